//! # hdvol
//!
//! A container volume driver that backs each volume with a disk image.
//!
//! Volumes live under a single home directory:
//!
//! - `<home>/img/<name>/` holds the image and its descriptor
//! - `<home>/mnt/<name>` is where the image is mounted
//!
//! Images are attached once no matter how many containers mount a volume;
//! the last unmount detaches them.
//!
//! ## Usage
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use hdvol::DriverConfig;
//! use hdvol_common::VolumeName;
//!
//! # fn example() -> hdvol_common::HdvolResult<()> {
//! let driver = DriverConfig::new("/pcs").build()?;
//! driver.reconcile()?;
//!
//! let name = VolumeName::new("data")?;
//! driver.create(&name, &HashMap::from([("size".to_string(), "1GB".to_string())]))?;
//! let mountpoint = driver.mount(&name)?;
//! println!("mounted at {}", mountpoint.display());
//! driver.unmount(&name)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod driver;
pub mod fstype;
pub mod image;
pub mod logging;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tool;
pub mod vstorage;

pub use config::{DriverArgs, DriverConfig};
pub use driver::{Capabilities, Scope, VolumeDriver, VolumeInfo, VolumeOptions};
