//! URL scheme marking.
//!
//! A player only hands a resource to a custom loader when it does not know the
//! URL's scheme, so resources are published as `ctlshttps://...` and turned back
//! into `https://...` right before the outbound request is built.

use url::Url;

/// Prefix prepended to a URL scheme to mark it for the custom loader.
pub const CUSTOM_SCHEME_PREFIX: &str = "ctls";

/// Toggles scheme marking with the default prefix.
///
/// See [`transform_url_scheme_with`].
pub fn transform_url_scheme(url: &str) -> String {
    transform_url_scheme_with(url, CUSTOM_SCHEME_PREFIX)
}

/// Toggles scheme marking: strips `prefix` from a marked scheme, prepends it otherwise.
///
/// Only the scheme is rewritten; the rest of the input is kept byte for byte, so
/// `transform(transform(u)) == u` for any URL whose scheme does not already start
/// with the prefix twice. Returns the input unchanged when it has no parseable
/// scheme or the rewritten URL would not parse.
pub fn transform_url_scheme_with(url: &str, prefix: &str) -> String {
    let scheme = match Url::parse(url) {
        Ok(parsed) => parsed.scheme().to_string(),
        Err(_) => return url.to_string(),
    };
    // Url lowercases the scheme; the input's own spelling has the same length.
    let rest = match url.get(scheme.len()..) {
        Some(rest) if rest.starts_with(':') => rest,
        _ => return url.to_string(),
    };

    let new_scheme = match scheme.strip_prefix(prefix) {
        Some(real) => real.to_string(),
        None => format!("{}{}", prefix, scheme),
    };
    if new_scheme.is_empty() {
        return url.to_string();
    }

    let candidate = format!("{}{}", new_scheme, rest);
    match Url::parse(&candidate) {
        Ok(_) => candidate,
        Err(_) => url.to_string(),
    }
}

/// True when the URL's scheme carries the marker prefix.
pub fn is_marked(url: &str, prefix: &str) -> bool {
    Url::parse(url)
        .map(|u| u.scheme().starts_with(prefix))
        .unwrap_or(false)
}
