//! HTTP response header parsing.
//!
//! The curl handler collects raw header lines; this turns the final header
//! block into the few facts the registry needs: status, MIME type, range
//! support and total length.

/// Response metadata extracted from one header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code from the status line, if one was seen.
    pub status: Option<u32>,
    /// MIME type from `Content-Type`, parameters stripped and lowercased.
    pub mime_type: Option<String>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accepts_byte_ranges: bool,
    /// Raw `Content-Range` value if present.
    pub content_range: Option<String>,
    /// `Content-Length` if present and numeric.
    pub content_length: Option<u64>,
}

impl ResponseHead {
    /// True for a 2xx status.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }

    /// Total resource length: the `Content-Range` total, or `Content-Length`
    /// when the server answered 200 and so sent the whole resource.
    pub fn total_length(&self) -> Option<u64> {
        if let Some(cr) = self.content_range.as_deref() {
            return parse_content_range_total(cr);
        }
        if self.status == Some(200) {
            return self.content_length;
        }
        None
    }
}

/// Extracts the total length from a `Content-Range` value.
///
/// Accepts `bytes <start>-<end>/<total>` and `bytes */<total>`. Returns `None`
/// if the value does not start with `bytes `, has no `/`, or the total is not
/// an integer (including the `*` unknown-length form).
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let rest = header.strip_prefix("bytes ")?;
    let (_, total) = rest.split_once('/')?;
    total.trim().parse::<u64>().ok()
}

/// Parses the status code from an `HTTP/x y reason` line.
pub fn parse_status_line(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    let proto = parts.next()?;
    if !proto.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse::<u32>().ok()
}

/// Normalizes a `Content-Type` value to its bare MIME type.
pub fn mime_type_from_content_type(value: &str) -> Option<String> {
    let mime = value.split(';').next().unwrap_or("").trim();
    if mime.is_empty() || !mime.contains('/') {
        return None;
    }
    Some(mime.to_ascii_lowercase())
}

/// Parse collected header lines (one block, status line first) into a `ResponseHead`.
pub fn parse_response_head(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            head.status = parse_status_line(line);
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-type") {
                head.mime_type = mime_type_from_content_type(value);
            }
            if name.eq_ignore_ascii_case("accept-ranges") {
                head.accepts_byte_ranges = value.eq_ignore_ascii_case("bytes");
            }
            if name.eq_ignore_ascii_case("content-range") {
                head.content_range = Some(value.to_string());
            }
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    head.content_length = Some(n);
                }
            }
        }
    }

    head
}

/// Maps a MIME type to the content type identifier reported to the player.
///
/// Unknown types are reported as the MIME type itself.
pub fn content_type_identifier(mime: &str) -> String {
    let id = match mime {
        "video/mp4" | "video/x-m4v" => "public.mpeg-4",
        "audio/mp4" | "audio/x-m4a" | "audio/aac" => "public.mpeg-4-audio",
        "video/quicktime" => "com.apple.quicktime-movie",
        "audio/mpeg" | "audio/mp3" => "public.mp3",
        "video/mp2t" => "public.mpeg-2-transport-stream",
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "audio/mpegurl" => {
            "public.m3u8-playlist"
        }
        "video/x-matroska" => "org.matroska.mkv",
        "video/webm" => "org.webmproject.webm",
        "audio/wav" | "audio/x-wav" => "com.microsoft.waveform-audio",
        "audio/flac" => "org.xiph.flac",
        _ => return mime.to_string(),
    };
    id.to_string()
}
