//! Easy2 Handler for one task in the curl multi transport.
//! Buffers the response head and body chunks as events until the loop drains them.

use std::str;

use crate::headers::parse_response_head;
use crate::transport::{TaskId, TransportEvent};

/// Handler state for one transfer. Implements curl's Handler for Easy2.
pub struct TaskHandler {
    task: TaskId,
    /// Header lines of the latest response block (cleared on each status line).
    pub(super) response_headers: Vec<String>,
    response_sent: bool,
    events: Vec<TransportEvent>,
    pub(super) bytes_received: u64,
}

impl TaskHandler {
    pub(super) fn new(task: TaskId) -> Self {
        Self {
            task,
            response_headers: Vec::new(),
            response_sent: false,
            events: Vec::new(),
            bytes_received: 0,
        }
    }

    fn emit_response(&mut self) {
        if self.response_sent {
            return;
        }
        self.response_sent = true;
        let head = parse_response_head(&self.response_headers);
        self.events.push(TransportEvent::Response {
            task: self.task,
            head,
        });
    }

    /// Events buffered since the last drain.
    pub(super) fn take_events(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.events)
    }

    /// Remaining events once the transfer is over. A response with no body
    /// (e.g. a bare 404) still reports its head.
    pub(super) fn finish(&mut self) -> Vec<TransportEvent> {
        if !self.response_headers.is_empty() {
            self.emit_response();
        }
        self.take_events()
    }
}

impl curl::easy::Handler for TaskHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.response_headers.clear();
            }
            if !line.is_empty() {
                self.response_headers.push(line.to_string());
            }
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        self.emit_response();
        self.bytes_received += data.len() as u64;
        self.events.push(TransportEvent::Data {
            task: self.task,
            chunk: data.to_vec(),
        });
        Ok(data.len())
    }
}
