//! Volume plugin HTTP API.

pub mod server;
pub mod types;

pub use server::{PLUGIN_CONTENT_TYPE, app};
