//! Minimal HTTP/1.1 server answering Range GETs for integration tests.
//!
//! Serves a single static body with a configurable content type. Options let a
//! test force an error status, drop the content type, ignore ranges or trickle
//! the body out slowly so a transfer can be cancelled mid-flight.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// `Content-Type` header value; `None` omits the header.
    pub content_type: Option<&'static str>,
    /// Answer every request with this status line and no body.
    pub status_override: Option<&'static str>,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes`.
    pub advertise_ranges: bool,
    /// Write the body in chunks of this size with a pause between them.
    pub trickle: Option<(usize, Duration)>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            content_type: Some("video/mp4"),
            status_override: None,
            support_ranges: true,
            advertise_ranges: true,
            trickle: None,
        }
    }
}

/// Handle to a running server.
pub struct RangeServer {
    /// Base URL, e.g. "http://127.0.0.1:12345/".
    pub url: String,
    requests: Arc<AtomicUsize>,
}

impl RangeServer {
    /// Requests accepted so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// The base URL with its scheme marked for the loader.
    pub fn marked_url(&self, path: &str) -> String {
        format!("ctls{}{}", self.url, path)
    }
}

/// Starts a server in a background thread serving `body`. The server runs
/// until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            let body = Arc::clone(&body);
            let opts = opts.clone();
            thread::spawn(move || handle(stream, &body, &opts));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/", port),
        requests,
    }
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &RangeServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }
    if let Some(status) = opts.status_override {
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let total = body.len() as u64;
    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start >= total || start > end_incl {
                ("416 Range Not Satisfiable", Some(format!("bytes */{}", total)), &body[0..0])
            } else {
                let (s, e) = (start as usize, end_incl as usize + 1);
                (
                    "206 Partial Content",
                    Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                    &body[s..e],
                )
            }
        }
        None => ("200 OK", None, body),
    };

    let mut head = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\n", status, slice.len());
    if let Some(cr) = content_range {
        head.push_str(&format!("Content-Range: {}\r\n", cr));
    }
    if let Some(ct) = opts.content_type {
        head.push_str(&format!("Content-Type: {}\r\n", ct));
    }
    if opts.advertise_ranges && opts.support_ranges {
        head.push_str("Accept-Ranges: bytes\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    match opts.trickle {
        Some((chunk, pause)) => {
            for part in slice.chunks(chunk.max(1)) {
                if stream.write_all(part).is_err() {
                    return;
                }
                let _ = stream.flush();
                thread::sleep(pause);
            }
        }
        None => {
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            continue;
        };
        if let Some((a, b)) = spec.split_once('-') {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = b.trim();
            let end_incl = if end.is_empty() {
                u64::MAX
            } else {
                end.parse::<u64>().unwrap_or(0)
            };
            range = Some((start, end_incl));
        }
    }
    (method, range)
}
