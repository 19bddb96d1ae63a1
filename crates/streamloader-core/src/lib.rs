pub mod config;
pub mod logging;

pub mod auth;
pub mod error;
pub mod headers;
pub mod identity;
pub mod loader;
pub mod registry;
pub mod request;
pub mod router;
pub mod scheme;
pub mod transport;
