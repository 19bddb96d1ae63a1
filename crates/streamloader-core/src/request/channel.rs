//! Loading request that forwards everything into a tokio channel.
//!
//! Lets an async consumer (the CLI, tests, an embedding player) stream the
//! bytes as they arrive while the loader thread drives the transfer.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::{ContentInfo, DataRange, LoadOutcome, LoadingRequest, RequestId};

/// One notification from the loader to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    ContentInfo(ContentInfo),
    Data(Vec<u8>),
    Finished(LoadOutcome),
}

#[derive(Debug, Default)]
struct State {
    content_info: Option<ContentInfo>,
    bytes_received: u64,
    outcome: Option<LoadOutcome>,
}

/// `LoadingRequest` backed by an unbounded `tokio::sync::mpsc` channel.
#[derive(Debug)]
pub struct ChannelRequest {
    id: RequestId,
    url: String,
    range: Option<DataRange>,
    wants_content_info: bool,
    state: Mutex<State>,
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl ChannelRequest {
    pub fn new(
        url: impl Into<String>,
        range: Option<DataRange>,
        wants_content_info: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = Arc::new(Self {
            id: RequestId::next(),
            url: url.into(),
            range,
            wants_content_info,
            state: Mutex::new(State::default()),
            tx,
        });
        (request, rx)
    }

    /// Data-only request for `range`.
    pub fn data(
        url: impl Into<String>,
        range: DataRange,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RequestEvent>) {
        Self::new(url, Some(range), false)
    }

    /// Content-information request. Players probe with the first two bytes.
    pub fn content_info(
        url: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RequestEvent>) {
        Self::new(url, Some(DataRange::new(0, 2)), true)
    }

    pub fn bytes_received(&self) -> u64 {
        self.state().bytes_received
    }

    pub fn outcome(&self) -> Option<LoadOutcome> {
        self.state().outcome.clone()
    }

    pub fn content_info_snapshot(&self) -> Option<ContentInfo> {
        self.state().content_info.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LoadingRequest for ChannelRequest {
    fn id(&self) -> RequestId {
        self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn data_range(&self) -> Option<DataRange> {
        self.range
    }

    fn wants_content_info(&self) -> bool {
        self.wants_content_info
    }

    fn has_content_info(&self) -> bool {
        self.state().content_info.is_some()
    }

    fn set_content_info(&self, info: ContentInfo) {
        self.state().content_info = Some(info.clone());
        let _ = self.tx.send(RequestEvent::ContentInfo(info));
    }

    fn respond_with(&self, chunk: &[u8]) {
        self.state().bytes_received += chunk.len() as u64;
        let _ = self.tx.send(RequestEvent::Data(chunk.to_vec()));
    }

    fn is_finished(&self) -> bool {
        self.state().outcome.is_some()
    }

    fn finish(&self, outcome: LoadOutcome) {
        {
            let mut state = self.state();
            if state.outcome.is_some() {
                tracing::warn!(request = %self.id, "finish called on a finished request");
                return;
            }
            state.outcome = Some(outcome.clone());
        }
        let _ = self.tx.send(RequestEvent::Finished(outcome));
    }
}

/// Everything a consumer received for one request.
#[derive(Debug, Default)]
pub struct Collected {
    pub content_info: Option<ContentInfo>,
    pub bytes: Vec<u8>,
    pub outcome: Option<LoadOutcome>,
}

/// Reads events until the request finishes or the sender goes away.
pub async fn collect(rx: &mut mpsc::UnboundedReceiver<RequestEvent>) -> Collected {
    let mut out = Collected::default();
    while let Some(event) = rx.recv().await {
        match event {
            RequestEvent::ContentInfo(info) => out.content_info = Some(info),
            RequestEvent::Data(chunk) => out.bytes.extend_from_slice(&chunk),
            RequestEvent::Finished(outcome) => {
                out.outcome = Some(outcome);
                break;
            }
        }
    }
    out
}
