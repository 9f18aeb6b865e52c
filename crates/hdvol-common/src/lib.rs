//! # hdvol-common
//!
//! Shared types for the hdvol volume plugin.
//!
//! This crate provides the leaf functionality used by the driver and the daemon:
//! - The error taxonomy
//! - Volume name validation
//! - The on-disk path namespace
//! - Human-readable size parsing

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;
pub mod size;

pub use error::{HdvolError, HdvolResult};
pub use name::VolumeName;
pub use paths::VolumePaths;
pub use size::ByteSize;
