//! Scripted transport for unit tests: records what the loader asks for and
//! replays events queued by the test.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use super::{OutboundRequest, TaskId, Transport, TransportError, TransportEvent};
use crate::headers::{parse_response_head, ResponseHead};

#[derive(Default)]
pub struct FakeTransport {
    next_id: u64,
    pub created: Vec<(TaskId, OutboundRequest)>,
    pub resumed: Vec<TaskId>,
    pub cancelled: Vec<TaskId>,
    live: HashSet<TaskId>,
    queue: VecDeque<TransportEvent>,
    pub fail_create: bool,
    pub fail_resume: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn last_task(&self) -> TaskId {
        self.created.last().map(|(t, _)| *t).expect("no task created")
    }

    pub fn push_response(&mut self, task: TaskId, lines: &[&str]) {
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        self.push_head(task, parse_response_head(&lines));
    }

    pub fn push_head(&mut self, task: TaskId, head: ResponseHead) {
        self.queue.push_back(TransportEvent::Response { task, head });
    }

    pub fn push_data(&mut self, task: TaskId, chunk: &[u8]) {
        self.queue.push_back(TransportEvent::Data {
            task,
            chunk: chunk.to_vec(),
        });
    }

    pub fn push_complete(&mut self, task: TaskId, error: Option<TransportError>) {
        self.live.remove(&task);
        self.queue.push_back(TransportEvent::Complete { task, error });
    }
}

impl Transport for FakeTransport {
    fn create_task(&mut self, request: OutboundRequest) -> Result<TaskId, TransportError> {
        if self.fail_create {
            return Err(TransportError::InvalidRequest("scripted failure".into()));
        }
        let task = TaskId(self.next_id.max(1));
        self.next_id = task.0 + 1;
        self.created.push((task, request));
        self.live.insert(task);
        Ok(task)
    }

    fn resume(&mut self, task: TaskId) -> Result<(), TransportError> {
        if self.fail_resume {
            let err = TransportError::Other("scripted resume failure".into());
            self.live.remove(&task);
            self.queue.push_back(TransportEvent::Complete {
                task,
                error: Some(err.clone()),
            });
            return Err(err);
        }
        self.resumed.push(task);
        Ok(())
    }

    fn cancel(&mut self, task: TaskId) {
        self.cancelled.push(task);
        if self.live.remove(&task) {
            self.queue.push_back(TransportEvent::Complete {
                task,
                error: Some(TransportError::Cancelled),
            });
        }
    }

    fn poll_events(&mut self, _timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        Ok(self.queue.drain(..).collect())
    }

    fn active_tasks(&self) -> usize {
        self.live.len()
    }
}
