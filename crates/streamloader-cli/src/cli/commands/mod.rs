//! CLI command handlers, one file per command.

mod completions;
mod fetch;
mod info;
mod scheme;

pub use completions::run_completions;
pub use fetch::run_fetch;
pub use info::run_info;
pub use scheme::run_scheme;

use streamloader_core::scheme::{is_marked, transform_url_scheme_with};

/// Marks a plain URL for the loader; already-marked URLs pass through.
pub(crate) fn marked_url(url: &str, prefix: &str) -> String {
    if is_marked(url, prefix) {
        url.to_string()
    } else {
        transform_url_scheme_with(url, prefix)
    }
}
