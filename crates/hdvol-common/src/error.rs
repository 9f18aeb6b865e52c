//! Common error types for hdvol.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`HdvolError`].
pub type HdvolResult<T> = Result<T, HdvolError>;

/// Errors returned by every volume operation.
#[derive(Error, Diagnostic, Debug)]
pub enum HdvolError {
    /// A create option or driver default could not be parsed.
    #[error("Can't parse {option} {value}: {reason}")]
    #[diagnostic(
        code(hdvol::options::invalid),
        help("Recognized options are size, mode, clog, tier and scope")
    )]
    InvalidOption {
        /// Option name.
        option: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Volume name would escape the namespace.
    #[error("Invalid volume name: {name:?}")]
    #[diagnostic(
        code(hdvol::volume::invalid_name),
        help("Volume names must be 1-255 bytes and must not contain '/' or NUL")
    )]
    InvalidVolumeName {
        /// The rejected name.
        name: String,
    },

    /// No descriptor exists for the volume.
    #[error("Can't find volume {name}")]
    #[diagnostic(code(hdvol::volume::not_found))]
    VolumeNotFound {
        /// The volume name.
        name: String,
    },

    /// The volume image is attached and can't be removed.
    #[error("Volume {name} is in use (attached to {device})")]
    #[diagnostic(
        code(hdvol::volume::in_use),
        help("Unmount the volume from all containers first")
    )]
    VolumeInUse {
        /// The volume name.
        name: String,
        /// Block device the image is attached to.
        device: String,
    },

    /// The image engine failed.
    #[error("Can't {operation} image for volume {name}: {message}")]
    #[diagnostic(code(hdvol::image))]
    Image {
        /// Operation that failed (create, open, inspect, attach, detach).
        operation: &'static str,
        /// The volume name.
        name: String,
        /// Underlying failure.
        message: String,
    },

    /// Detach was requested on an image that is not attached.
    #[error("Image {image} is not attached")]
    #[diagnostic(code(hdvol::image::not_attached))]
    NotAttached {
        /// Image or descriptor path.
        image: String,
    },

    /// An external tool exited with an error.
    #[error("{tool} error {code}: {message}")]
    #[diagnostic(code(hdvol::tool))]
    Tool {
        /// Program name.
        tool: String,
        /// Exit status, or -1 when killed by a signal or not started.
        code: i32,
        /// First line of stderr.
        message: String,
    },

    /// The host mount table is malformed.
    #[error("Can't parse mount table line {line:?}: {reason}")]
    #[diagnostic(code(hdvol::mountinfo))]
    MountInfo {
        /// Offending line.
        line: String,
        /// Parse failure.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(hdvol::io))]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(hdvol::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(hdvol::internal), help("This is a bug, please report it"))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl HdvolError {
    /// Build an [`HdvolError::InvalidOption`].
    pub fn invalid_option(
        option: impl Into<String>,
        value: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidOption {
            option: option.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an [`HdvolError::Image`] from anything printable.
    pub fn image(operation: &'static str, name: &str, err: impl std::fmt::Display) -> Self {
        Self::Image {
            operation,
            name: name.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error means the image was already detached.
    #[must_use]
    pub const fn is_not_attached(&self) -> bool {
        matches!(self, Self::NotAttached { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HdvolError::VolumeNotFound {
            name: "vol1".to_string(),
        };
        assert_eq!(err.to_string(), "Can't find volume vol1");

        let err = HdvolError::Tool {
            tool: "vstorage".to_string(),
            code: 2,
            message: "no such file".to_string(),
        };
        assert_eq!(err.to_string(), "vstorage error 2: no such file");
    }

    #[test]
    fn invalid_option_display() {
        let err = HdvolError::invalid_option("size", "lots", "invalid size");
        assert_eq!(err.to_string(), "Can't parse size lots: invalid size");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HdvolError = io_err.into();
        assert!(matches!(err, HdvolError::Io(_)));
    }

    #[test]
    fn not_attached_classification() {
        let err = HdvolError::NotAttached {
            image: "/pcs/img/a/DiskDescriptor.xml".to_string(),
        };
        assert!(err.is_not_attached());
        assert!(!HdvolError::image("detach", "a", "busy").is_not_attached());
    }
}
