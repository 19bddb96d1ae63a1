//! Classify curl errors into transport error kinds.

use super::TransportError;

/// Maps a libcurl error onto a `TransportError`.
pub fn classify_curl_error(e: &curl::Error) -> TransportError {
    let msg = e.to_string();
    if e.is_operation_timedout() {
        return TransportError::Timeout(msg);
    }
    if e.is_ssl_connect_error()
        || e.is_ssl_certproblem()
        || e.is_ssl_cipher()
        || e.is_peer_failed_verification()
        || e.is_ssl_engine_notfound()
        || e.is_ssl_engine_setfailed()
    {
        return TransportError::Tls(msg);
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return TransportError::Connection(msg);
    }
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return TransportError::InvalidRequest(msg);
    }
    TransportError::Other(msg)
}
