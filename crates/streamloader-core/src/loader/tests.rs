use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::identity::test_identity;
use crate::request::{ChannelRequest, DataRange, LoadOutcome};
use crate::transport::fake::FakeTransport;

const TICK: Duration = Duration::from_millis(1);

fn loader() -> ResourceLoader<FakeTransport> {
    ResourceLoader::new(FakeTransport::new(), LoaderSettings::default(), None)
}

fn loader_with_identity() -> ResourceLoader<FakeTransport> {
    ResourceLoader::new(
        FakeTransport::new(),
        LoaderSettings::default(),
        Some(ClientCertHandler::new(Some(test_identity()))),
    )
}

const OK_HEAD: &[&str] = &[
    "HTTP/1.1 206 Partial Content",
    "Content-Type: video/mp4",
    "Accept-Ranges: bytes",
    "Content-Range: bytes 0-3/4000",
];

#[test]
fn accepts_data_request_with_unmarked_url_and_range() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttps://media.example.com/v.mp4?x=1", DataRange::new(100, 50));
    assert_eq!(l.should_load(req.clone()), Ok(true));

    let (task, out) = &l.transport().created[0];
    assert_eq!(out.url, "https://media.example.com/v.mp4?x=1");
    assert_eq!(out.header("Range"), Some("bytes=100-149"));
    assert_eq!(l.transport().resumed, vec![*task]);
    assert_eq!(l.task_for(req.id()), Some(*task));
    assert!(l.check_consistency().is_ok());
}

#[test]
fn open_ended_window_requests_to_end() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::to_end(4096));
    assert_eq!(l.should_load(req), Ok(true));
    assert_eq!(l.transport().created[0].1.header("range"), Some("bytes=4096-"));
}

#[test]
fn extra_headers_precede_range() {
    let settings = LoaderSettings {
        extra_headers: vec![("X-Emby-Token".into(), "abc".into())],
        ..LoaderSettings::default()
    };
    let mut l = ResourceLoader::new(FakeTransport::new(), settings, None);
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    assert_eq!(l.should_load(req), Ok(true));
    let headers = &l.transport().created[0].1.headers;
    assert_eq!(headers[0].0, "X-Emby-Token");
    assert_eq!(headers[1].0, "Range");
}

#[test]
fn declines_requests_it_cannot_load() {
    let mut l = loader();
    let (no_range, _a) = ChannelRequest::new("ctlshttp://h/v.mp4", None, true);
    let (empty, _b) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(10, 0));
    let (ftp, _c) = ChannelRequest::data("ctlsftp://h/v.mp4", DataRange::new(0, 10));
    assert_eq!(l.should_load(no_range.clone()), Ok(false));
    assert_eq!(l.should_load(empty.clone()), Ok(false));
    assert_eq!(l.should_load(ftp), Ok(false));
    assert!(l.transport().created.is_empty());
    assert!(l.is_idle());
    assert!(!no_range.is_finished(), "declining leaves the request to the caller");
    assert!(!empty.is_finished());
}

#[test]
fn declines_when_transport_cannot_create_task() {
    let mut l = loader();
    l.transport_mut().fail_create = true;
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    assert_eq!(l.should_load(req.clone()), Ok(false));
    assert_eq!(l.live_requests(), 0);
    assert!(!req.is_finished());
}

#[test]
fn resume_failure_fails_the_request() {
    let mut l = loader();
    l.transport_mut().fail_resume = true;
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    assert_eq!(l.should_load(req.clone()), Ok(true));
    assert!(matches!(
        req.outcome(),
        Some(LoadOutcome::Failed(LoadError::Transport(_)))
    ));
    assert!(l.check_consistency().is_ok());
    l.process_events(TICK).unwrap();
    assert!(l.router().registry().is_empty());
    assert!(l.is_idle());
    assert_eq!(l.transport().active_tasks(), 0);
}

#[test]
fn same_request_twice_is_a_violation() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    assert_eq!(l.should_load(req.clone()), Ok(true));
    assert_eq!(
        l.should_load(req.clone()),
        Err(InvariantViolation::DuplicateRequest(req.id()))
    );
    assert_eq!(l.transport().created.len(), 1);
}

#[test]
fn streams_a_range_to_completion() {
    let mut l = loader();
    let (req, mut rx) = ChannelRequest::content_info("ctlshttps://h/v.mp4");
    assert_eq!(l.should_load(req.clone()), Ok(true));
    let task = l.transport().last_task();

    l.transport_mut().push_response(task, OK_HEAD);
    l.transport_mut().push_data(task, b"ab");
    l.process_events(TICK).unwrap();
    assert!(l.check_consistency().is_ok());
    assert_eq!(req.bytes_received(), 2);

    l.transport_mut().push_complete(task, None);
    l.process_events(TICK).unwrap();
    assert_eq!(req.outcome(), Some(LoadOutcome::Complete));
    let info = req.content_info_snapshot().unwrap();
    assert_eq!(info.content_length, Some(4000));
    assert!(info.byte_range_access_supported);
    assert!(l.is_idle());

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event);
    }
    assert!(matches!(kinds[0], crate::request::RequestEvent::ContentInfo(_)));
    assert!(matches!(kinds.last(), Some(crate::request::RequestEvent::Finished(_))));
}

#[test]
fn cancel_unmaps_now_and_finishes_on_completion() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 1000));
    l.should_load(req.clone()).unwrap();
    let task = l.transport().last_task();
    l.transport_mut().push_response(task, OK_HEAD);
    l.transport_mut().push_data(task, b"abcd");
    l.process_events(TICK).unwrap();

    assert_eq!(l.cancel(&*req), Ok(CancelOutcome::Cancelled));
    assert_eq!(l.live_requests(), 0);
    assert!(l.router().registry().get(task).unwrap().cancel_requested);
    assert!(!req.is_finished());
    assert!(l.check_consistency().is_ok());

    l.process_events(TICK).unwrap();
    assert_eq!(req.outcome(), Some(LoadOutcome::Cancelled));
    assert!(l.is_idle());
}

#[test]
fn second_cancel_before_completion_is_a_violation() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    l.should_load(req.clone()).unwrap();
    assert_eq!(l.cancel(&*req), Ok(CancelOutcome::Cancelled));
    assert_eq!(
        l.cancel(&*req),
        Err(InvariantViolation::MissingRequest(req.id()))
    );
}

#[test]
fn cancel_after_finish_is_a_no_op() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 4));
    l.should_load(req.clone()).unwrap();
    let task = l.transport().last_task();
    l.transport_mut().push_response(task, OK_HEAD);
    l.transport_mut().push_data(task, b"abcd");
    l.transport_mut().push_complete(task, None);
    l.process_events(TICK).unwrap();

    assert_eq!(l.cancel(&*req), Ok(CancelOutcome::AlreadyFinished));
    assert_eq!(req.outcome(), Some(LoadOutcome::Complete));
    assert!(l.transport().cancelled.is_empty());
}

#[test]
fn bad_status_rejects_and_cancels_task() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/missing.mp4", DataRange::new(0, 10));
    l.should_load(req.clone()).unwrap();
    let task = l.transport().last_task();
    l.transport_mut()
        .push_response(task, &["HTTP/1.1 404 Not Found", "Content-Type: text/html"]);
    l.transport_mut().push_data(task, b"<html>");
    l.process_events(TICK).unwrap();

    assert_eq!(l.transport().cancelled, vec![task]);
    assert_eq!(
        req.outcome(),
        Some(LoadOutcome::Failed(LoadError::BadStatus(404)))
    );
    assert_eq!(req.bytes_received(), 0, "body of a rejected response is dropped");

    l.process_events(TICK).unwrap();
    assert!(l.is_idle());
}

#[test]
fn missing_content_type_fails_request() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    l.should_load(req.clone()).unwrap();
    let task = l.transport().last_task();
    l.transport_mut()
        .push_response(task, &["HTTP/1.1 206 Partial Content", "Content-Range: bytes 0-9/10"]);
    l.process_events(TICK).unwrap();
    l.process_events(TICK).unwrap();
    assert_eq!(
        req.outcome(),
        Some(LoadOutcome::Failed(LoadError::MissingContentType))
    );
    assert!(l.is_idle());
}

#[test]
fn transport_error_fails_request() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    l.should_load(req.clone()).unwrap();
    let task = l.transport().last_task();
    l.transport_mut()
        .push_complete(task, Some(TransportError::Connection("refused".into())));
    l.process_events(TICK).unwrap();
    assert!(matches!(
        req.outcome(),
        Some(LoadOutcome::Failed(LoadError::Transport(_)))
    ));
    assert!(l.is_idle());
}

#[test]
fn https_task_carries_client_credential() {
    let mut l = loader_with_identity();
    let (secure, _a) = ChannelRequest::data("ctlshttps://h/v.mp4", DataRange::new(0, 10));
    let (plain, _b) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    l.should_load(secure).unwrap();
    l.should_load(plain).unwrap();
    assert!(l.transport().created[0].1.credential.is_some());
    assert!(l.transport().created[1].1.credential.is_none());
}

#[test]
fn credential_withheld_after_tls_failure() {
    let mut l = loader_with_identity();
    let (first, _a) = ChannelRequest::data("ctlshttps://h/v.mp4", DataRange::new(0, 10));
    l.should_load(first).unwrap();
    let task = l.transport().last_task();
    l.transport_mut()
        .push_complete(task, Some(TransportError::Tls("bad certificate".into())));
    l.process_events(TICK).unwrap();

    let (second, _b) = ChannelRequest::data("ctlshttps://h/v.mp4", DataRange::new(0, 10));
    l.should_load(second).unwrap();
    assert!(l.transport().created[1].1.credential.is_none());
}

#[test]
fn renewal_is_unsupported() {
    let l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    assert_eq!(
        l.should_renew(&*req),
        Err(InvariantViolation::RenewalUnsupported)
    );
}

#[test]
fn session_challenge_always_defers() {
    let l = loader_with_identity();
    let challenge = AuthChallenge::client_certificate("h", 0);
    assert!(l.session_challenge(&challenge).is_deferred());
}

#[test]
fn shutdown_cancels_everything_in_flight() {
    let mut l = loader();
    let (a, _ra) = ChannelRequest::data("ctlshttp://h/a.mp4", DataRange::new(0, 10));
    let (b, _rb) = ChannelRequest::data("ctlshttp://h/b.mp4", DataRange::new(0, 10));
    l.should_load(a.clone()).unwrap();
    l.should_load(b.clone()).unwrap();

    assert!(l.shutdown(TICK, 4));
    assert_eq!(a.outcome(), Some(LoadOutcome::Cancelled));
    assert_eq!(b.outcome(), Some(LoadOutcome::Cancelled));
    assert!(l.is_idle());
}

#[test]
fn fail_all_fails_live_requests() {
    let mut l = loader();
    let (a, _ra) = ChannelRequest::data("ctlshttp://h/a.mp4", DataRange::new(0, 10));
    l.should_load(a.clone()).unwrap();
    l.fail_all(&TransportError::Other("multi broke".into()));
    assert!(matches!(
        a.outcome(),
        Some(LoadOutcome::Failed(LoadError::Transport(_)))
    ));
    l.process_events(TICK).unwrap();
    assert!(l.is_idle());
}

#[test]
fn unknown_task_event_is_reported_not_routed() {
    let mut l = loader();
    let err = l
        .handle_event(TransportEvent::Data {
            task: TaskId(99),
            chunk: vec![1],
        })
        .unwrap_err();
    assert_eq!(err, InvariantViolation::UnknownTask(TaskId(99)));
}

#[test]
fn plan_is_pure_and_matches_loader() {
    let (req, _rx) = ChannelRequest::data("ctlshttps://Media.Example.com:8920/v.mp4", DataRange::new(5, 5));
    let plan = plan_request(&*req, "ctls").unwrap();
    assert_eq!(plan.url, "https://Media.Example.com:8920/v.mp4");
    assert_eq!(plan.range, "bytes=5-9");
    assert_eq!(plan.host.as_deref(), Some("media.example.com"));
    assert!(plan.https);
    assert_eq!(plan_request(&*req, "ctls"), Some(plan));
    let shared: Arc<dyn LoadingRequest> = req;
    assert!(plan_request(shared.as_ref(), "xyz").is_none(), "unmarked for another prefix");
}

#[test]
fn transport_cancel_right_after_issue_tears_down_both_maps() {
    let mut l = loader();
    let (req, _rx) = ChannelRequest::data("ctlshttp://h/v.mp4", DataRange::new(0, 10));
    l.should_load(req.clone()).unwrap();
    let task = l.transport().last_task();
    l.transport_mut().push_complete(task, Some(TransportError::Cancelled));
    l.process_events(TICK).unwrap();

    assert_eq!(req.outcome(), Some(LoadOutcome::Cancelled));
    assert!(!req.outcome().unwrap().is_failure());
    assert_eq!(l.live_requests(), 0);
    assert!(l.router().registry().is_empty());
    assert!(l.check_consistency().is_ok());
}
