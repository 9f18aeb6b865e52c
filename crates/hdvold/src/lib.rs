//! hdvold - volume plugin daemon.
//!
//! Serves the container host's volume plugin protocol over a Unix socket
//! and hands every request to an [`hdvol::VolumeDriver`].

#![warn(missing_docs)]

pub mod api;

/// Where the container host looks for the plugin.
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/ploop.sock";
