//! Curl multi transport: single-threaded event loop, one Easy2 handle per task.
//!
//! All tasks share one `curl::multi` handle, so connections and TLS sessions
//! are reused across the range requests of a resource.

mod handler;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use curl::easy::{Easy2, List};
use curl::multi::{Easy2Handle, Multi};

use super::{classify_curl_error, OutboundRequest, TaskId, Transport, TransportError, TransportEvent};

use self::handler::TaskHandler;

/// Per-request libcurl settings.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard wall-clock limit so a stuck transfer eventually fails.
    pub timeout: Duration,
    pub max_redirections: u32,
    /// Receive speed cap in bytes/s.
    pub max_recv_speed: Option<u64>,
    /// Receive buffer size in bytes.
    pub buffer_size: Option<usize>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: Duration::from_secs(3600),
            max_redirections: 10,
            max_recv_speed: None,
            buffer_size: None,
        }
    }
}

fn curl_err(e: curl::Error) -> TransportError {
    classify_curl_error(&e)
}

fn multi_err(context: &str, e: curl::MultiError) -> TransportError {
    TransportError::Other(format!("curl multi {}: {}", context, e))
}

/// `Transport` backed by libcurl's multi interface.
pub struct CurlTransport {
    multi: Multi,
    options: CurlOptions,
    next_id: u64,
    /// Created but not yet resumed.
    created: HashMap<TaskId, Easy2<TaskHandler>>,
    /// Added to the multi handle and transferring.
    active: HashMap<TaskId, Easy2Handle<TaskHandler>>,
    /// Events produced outside a perform (cancellations).
    pending: VecDeque<TransportEvent>,
}

impl CurlTransport {
    pub fn new(options: CurlOptions) -> Self {
        Self {
            multi: Multi::new(),
            options,
            next_id: 1,
            created: HashMap::new(),
            active: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Configure an Easy2 handle for `request`: URL, headers, timeouts and
    /// the client certificate when a credential is attached.
    fn build_easy(
        &self,
        task: TaskId,
        request: &OutboundRequest,
    ) -> Result<Easy2<TaskHandler>, TransportError> {
        let opts = &self.options;
        let mut easy = Easy2::new(TaskHandler::new(task));
        easy.url(&request.url).map_err(curl_err)?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.max_redirections(opts.max_redirections)
            .map_err(curl_err)?;
        easy.connect_timeout(opts.connect_timeout)
            .map_err(curl_err)?;
        easy.low_speed_limit(opts.low_speed_limit)
            .map_err(curl_err)?;
        easy.low_speed_time(opts.low_speed_time)
            .map_err(curl_err)?;
        easy.timeout(opts.timeout).map_err(curl_err)?;
        if let Some(speed) = opts.max_recv_speed {
            easy.max_recv_speed(speed).map_err(curl_err)?;
        }
        if let Some(sz) = opts.buffer_size {
            easy.buffer_size(sz).map_err(curl_err)?;
        }

        if !request.headers.is_empty() {
            let mut list = List::new();
            for (k, v) in &request.headers {
                list.append(&format!("{}: {}", k.trim(), v.trim()))
                    .map_err(curl_err)?;
            }
            easy.http_headers(list).map_err(curl_err)?;
        }

        if let Some(credential) = &request.credential {
            easy.ssl_cert_blob(credential.identity.pkcs12())
                .map_err(curl_err)?;
            easy.ssl_cert_type("P12").map_err(curl_err)?;
            easy.key_password(credential.identity.passphrase())
                .map_err(curl_err)?;
        }

        Ok(easy)
    }
}

impl Transport for CurlTransport {
    fn create_task(&mut self, request: OutboundRequest) -> Result<TaskId, TransportError> {
        let task = TaskId(self.next_id);
        self.next_id += 1;
        let easy = self.build_easy(task, &request)?;
        self.created.insert(task, easy);
        tracing::debug!(%task, url = %request.url, "created task");
        Ok(task)
    }

    fn resume(&mut self, task: TaskId) -> Result<(), TransportError> {
        let easy = self
            .created
            .remove(&task)
            .ok_or_else(|| TransportError::InvalidRequest(format!("task {} not pending", task)))?;
        match self.multi.add2(easy) {
            Ok(handle) => {
                self.active.insert(task, handle);
                Ok(())
            }
            Err(e) => {
                let err = multi_err("add", e);
                self.pending.push_back(TransportEvent::Complete {
                    task,
                    error: Some(err.clone()),
                });
                Err(err)
            }
        }
    }

    fn cancel(&mut self, task: TaskId) {
        if self.created.remove(&task).is_none() {
            let Some(handle) = self.active.remove(&task) else {
                tracing::trace!(%task, "cancel for finished task ignored");
                return;
            };
            if let Err(e) = self.multi.remove2(handle) {
                tracing::warn!(%task, error = %e, "curl multi remove on cancel failed");
            }
        }
        tracing::debug!(%task, "task cancelled");
        self.pending.push_back(TransportEvent::Complete {
            task,
            error: Some(TransportError::Cancelled),
        });
    }

    fn poll_events(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        let mut events: Vec<TransportEvent> = self.pending.drain(..).collect();
        if self.active.is_empty() {
            return Ok(events);
        }

        let running = self.multi.perform().map_err(|e| multi_err("perform", e))?;

        let mut done: Vec<(TaskId, Result<(), curl::Error>)> = Vec::new();
        let active = &self.active;
        self.multi.messages(|msg| {
            for (task, handle) in active.iter() {
                if let Some(result) = msg.result_for2(handle) {
                    done.push((*task, result));
                    break;
                }
            }
        });

        // Body chunks of every task first, so a completion never overtakes its data.
        for handle in self.active.values_mut() {
            events.extend(handle.get_mut().take_events());
        }

        for (task, result) in done {
            let Some(handle) = self.active.remove(&task) else {
                continue;
            };
            let mut easy = self.multi.remove2(handle).map_err(|e| multi_err("remove", e))?;
            let handler = easy.get_mut();
            events.extend(handler.finish());
            let error = result.err().map(|e| classify_curl_error(&e));
            tracing::debug!(
                %task,
                bytes = handler.bytes_received,
                error = ?error,
                "task complete"
            );
            events.push(TransportEvent::Complete { task, error });
        }

        if events.is_empty() && running > 0 {
            self.multi
                .wait(&mut [], timeout)
                .map_err(|e| multi_err("wait", e))?;
        }
        Ok(events)
    }

    fn active_tasks(&self) -> usize {
        self.created.len() + self.active.len()
    }
}
