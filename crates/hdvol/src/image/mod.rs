//! Disk image engines.
//!
//! The driver never touches image internals. It creates images, opens them
//! through their descriptor, and attaches or detaches them via these traits.

mod ploop;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use hdvol_common::{ByteSize, HdvolError, HdvolResult};
use serde::{Deserialize, Serialize};

pub use ploop::{PloopEngine, PLOOP_TOOL, SYSFS_BLOCK};

/// Image layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Sparse image that grows on demand.
    #[default]
    Expanded,
    /// Fully allocated image.
    Preallocated,
    /// Plain raw image.
    Raw,
}

impl ImageMode {
    /// Name understood by the image tools.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expanded => "expanded",
            Self::Preallocated => "preallocated",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for ImageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageMode {
    type Err = HdvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expanded" => Ok(Self::Expanded),
            "preallocated" => Ok(Self::Preallocated),
            "raw" => Ok(Self::Raw),
            _ => Err(HdvolError::invalid_option(
                "mode",
                s,
                "expected expanded, preallocated or raw",
            )),
        }
    }
}

/// Parameters for creating an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParams<'a> {
    /// Image file to create. The descriptor is created next to it.
    pub image: &'a Path,
    /// Image capacity.
    pub size: ByteSize,
    /// Image layout.
    pub mode: ImageMode,
    /// Cluster block log size, in 512-byte sectors.
    pub clog: u8,
}

/// Creates and opens images.
pub trait ImageEngine: Send + Sync {
    /// Create a new image and its descriptor.
    ///
    /// # Errors
    ///
    /// Returns the engine failure.
    fn create(&self, params: &CreateParams<'_>) -> HdvolResult<()>;

    /// Open an existing image by its descriptor.
    ///
    /// The handle is closed when dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor can't be opened.
    fn open(&self, descriptor: &Path) -> HdvolResult<Box<dyn ImageHandle>>;
}

/// An open image.
pub trait ImageHandle: Send {
    /// Block device the image is attached to, if any. `None` means the
    /// image is not attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the attachment state can't be determined.
    fn attached_device(&self) -> HdvolResult<Option<String>>;

    /// Attach the image and mount it at `mountpoint`, returning the device.
    ///
    /// # Errors
    ///
    /// Returns the engine failure.
    fn attach(&self, mountpoint: &Path) -> HdvolResult<String>;

    /// Unmount and detach the image.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::NotAttached`] if the image is not attached, or
    /// the engine failure.
    fn detach(&self) -> HdvolResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!("expanded".parse::<ImageMode>().unwrap(), ImageMode::Expanded);
        assert_eq!(
            "preallocated".parse::<ImageMode>().unwrap(),
            ImageMode::Preallocated
        );
        assert_eq!("raw".parse::<ImageMode>().unwrap(), ImageMode::Raw);
    }

    #[test]
    fn reject_unknown_mode() {
        let err = "sparse".parse::<ImageMode>().unwrap_err();
        assert!(matches!(err, HdvolError::InvalidOption { ref option, .. } if option == "mode"));
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in [ImageMode::Expanded, ImageMode::Preallocated, ImageMode::Raw] {
            assert_eq!(mode.to_string().parse::<ImageMode>().unwrap(), mode);
        }
    }
}
