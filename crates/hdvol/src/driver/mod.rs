//! Volume lifecycle.
//!
//! A volume is a directory under the driver home holding an image and its
//! descriptor; it exists exactly when the descriptor does. The driver moves
//! volumes through create, mount, unmount and remove, keeping per-volume
//! reference counts so shared volumes are attached once.

pub mod mounts;
pub mod options;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use hdvol_common::{HdvolError, HdvolResult, VolumeName, VolumePaths};

use crate::config::DriverConfig;
use crate::image::{CreateParams, ImageEngine, ImageHandle};
use crate::tool::ToolRunner;
use crate::vstorage::{self, Vstorage};

pub use mounts::{MountEntry, MountTable, Release};
pub use options::{Scope, VolumeOptions};

/// What the driver reports about a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: VolumeName,
    /// Where the volume is (or would be) mounted.
    pub mountpoint: PathBuf,
    /// Descriptor modification time.
    pub created_at: Option<DateTime<Utc>>,
    /// Attached block device, if mounted.
    pub device: Option<String>,
    /// Number of consumers currently using the mount.
    pub mount_count: u32,
}

/// Driver capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Volume visibility.
    pub scope: Scope,
}

/// The volume driver.
pub struct VolumeDriver {
    paths: VolumePaths,
    defaults: VolumeOptions,
    engine: Arc<dyn ImageEngine>,
    vstorage: Vstorage,
    mounts: MountTable,
}

impl VolumeDriver {
    /// Set up a driver rooted at the configured home directory.
    ///
    /// Resolves `auto` scope from the home directory's filesystem and creates
    /// the image and mountpoint roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory is missing or the roots can't
    /// be created.
    pub fn new(
        config: &DriverConfig,
        engine: Arc<dyn ImageEngine>,
        runner: Arc<dyn ToolRunner>,
    ) -> HdvolResult<Self> {
        let home = &config.home;
        match fs::metadata(home) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(HdvolError::Config {
                    message: format!("home {} is not a directory", home.display()),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HdvolError::Config {
                    message: format!("home {} does not exist", home.display()),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut defaults = config.defaults;
        if defaults.scope == Scope::Auto {
            defaults.scope = if vstorage::is_on_vstorage(home, &config.mountinfo) {
                Scope::Global
            } else {
                Scope::Local
            };
            tracing::info!(scope = %defaults.scope, "Autodetected driver scope");
        }

        let paths = VolumePaths::new(home);
        paths.create_dirs()?;

        Ok(Self {
            paths,
            defaults,
            engine,
            vstorage: Vstorage::with_program(runner, config.vstorage_tool.clone()),
            mounts: MountTable::new(),
        })
    }

    /// Driver paths.
    #[must_use]
    pub const fn paths(&self) -> &VolumePaths {
        &self.paths
    }

    /// Options applied when a request doesn't override them.
    #[must_use]
    pub const fn defaults(&self) -> &VolumeOptions {
        &self.defaults
    }

    /// Resolved driver scope.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.defaults.scope
    }

    /// Mount state.
    #[must_use]
    pub const fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Create a volume. Creating an existing volume succeeds without changes.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options (before touching the filesystem),
    /// if the volume directory can't be created, or if image creation fails.
    /// A failed image creation removes the volume directory again.
    pub fn create(&self, name: &VolumeName, opts: &HashMap<String, String>) -> HdvolResult<()> {
        if self.exists(name)? {
            tracing::debug!(%name, "Volume already exists");
            return Ok(());
        }

        let opts = self.defaults.resolve(opts).inspect_err(|e| {
            tracing::error!(%name, error = %e, "Rejecting volume options");
        })?;

        tracing::debug!(%name, ?opts, "Creating volume");
        let dir = self.paths.dir(name);
        create_private_dir(&dir)?;

        if let Err(e) = self.vstorage.set_tier(&dir, opts.tier) {
            tracing::warn!(%name, tier = opts.tier, error = %e, "Can't set storage tier");
        }

        let image = self.paths.image(name);
        let params = CreateParams {
            image: &image,
            size: opts.size,
            mode: opts.mode,
            clog: opts.clog,
        };
        if let Err(e) = self.engine.create(&params) {
            tracing::error!(%name, error = %e, "Can't create image");
            if let Err(rm) = fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %rm, "Can't clean up volume directory");
            }
            return Err(HdvolError::image("create", name.as_str(), e));
        }

        tracing::info!(%name, size = %opts.size, mode = %opts.mode, "Volume created");
        Ok(())
    }

    /// Remove a volume. Removing a missing volume succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::VolumeInUse`] without deleting anything if the
    /// image is attached, or the filesystem error if deletion fails part way.
    pub fn remove(&self, name: &VolumeName) -> HdvolResult<()> {
        tracing::debug!(%name, "Removing volume");

        if let Ok(image) = self.engine.open(&self.paths.descriptor(name)) {
            let device = image
                .attached_device()
                .map_err(|e| HdvolError::image("inspect", name.as_str(), e))?;
            if let Some(device) = device {
                tracing::error!(%name, %device, "Refusing to remove attached volume");
                return Err(HdvolError::VolumeInUse {
                    name: name.to_string(),
                    device,
                });
            }
        }

        match fs::remove_dir_all(self.paths.dir(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(%name, error = %e, "Can't remove volume directory");
                return Err(e.into());
            }
        }

        let mountpoint = self.paths.mountpoint(name);
        match fs::remove_dir(&mountpoint) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(mountpoint = %mountpoint.display(), error = %e, "Leaving mountpoint behind");
            }
        }

        tracing::info!(%name, "Volume removed");
        Ok(())
    }

    /// Mount a volume, attaching its image for the first consumer only.
    ///
    /// Returns the mountpoint.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::VolumeNotFound`] for unknown volumes, or the
    /// filesystem or image engine failure.
    pub fn mount(&self, name: &VolumeName) -> HdvolResult<PathBuf> {
        tracing::debug!(%name, "Mounting volume");
        self.require(name)?;

        let mountpoint = self.paths.mountpoint(name);
        match create_private_dir(&mountpoint) {
            Ok(()) => {}
            Err(HdvolError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let entry = self.mounts.acquire(name, || {
            let image = self.open(name)?;
            image
                .attach(&mountpoint)
                .map_err(|e| HdvolError::image("attach", name.as_str(), e))
        })?;

        tracing::debug!(
            %name,
            mountpoint = %mountpoint.display(),
            device = %entry.device,
            count = entry.count,
            "Volume mounted"
        );
        Ok(mountpoint)
    }

    /// Unmount a volume, detaching its image when the last consumer leaves.
    /// Unmounting a volume that isn't mounted succeeds.
    ///
    /// # Errors
    ///
    /// Returns the image engine failure; "already detached" is not a failure.
    pub fn unmount(&self, name: &VolumeName) -> HdvolResult<()> {
        tracing::debug!(%name, "Unmounting volume");

        let released = self.mounts.release(name, |device| {
            let image = self.open(name)?;
            match image.detach() {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_attached() => {
                    tracing::debug!(%name, device, "Image was already detached");
                    Ok(())
                }
                Err(e) => Err(HdvolError::image("detach", name.as_str(), e)),
            }
        });

        match released {
            Ok(Release::NotMounted) => tracing::debug!(%name, "Volume was not mounted"),
            Ok(Release::Decremented(count)) => tracing::debug!(%name, count, "Volume still in use"),
            Ok(Release::Detached) => tracing::debug!(%name, "Volume unmounted"),
            Err(ref e) => tracing::error!(%name, error = %e, "Can't unmount volume"),
        }
        released.map(|_| ())
    }

    /// Describe a volume.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::VolumeNotFound`] for unknown volumes.
    pub fn get(&self, name: &VolumeName) -> HdvolResult<VolumeInfo> {
        tracing::debug!(%name, "Getting volume");
        self.require(name)?;
        Ok(self.info(name))
    }

    /// Mountpoint of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::VolumeNotFound`] for unknown volumes.
    pub fn path(&self, name: &VolumeName) -> HdvolResult<PathBuf> {
        tracing::debug!(%name, "Getting volume path");
        self.require(name)?;
        Ok(self.paths.mountpoint(name))
    }

    /// All volumes, sorted by name.
    ///
    /// Directory entries that can't be inspected or have no descriptor are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the image root can't be read.
    pub fn list(&self) -> HdvolResult<Vec<VolumeInfo>> {
        let root = self.paths.images();
        let entries = fs::read_dir(&root).inspect_err(|e| {
            tracing::error!(dir = %root.display(), error = %e, "Can't list volumes");
        })?;

        let mut volumes: Vec<VolumeInfo> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().to_str().map(VolumeName::new))
            .filter_map(Result::ok)
            .filter(|name| self.exists(name).unwrap_or(false))
            .map(|name| self.info(&name))
            .collect();

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    /// Driver capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: self.defaults.scope,
        }
    }

    /// Seed mount state from images that are already attached.
    ///
    /// Each attached image is recorded with a single consumer. Returns the
    /// number of volumes recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume list can't be read.
    pub fn reconcile(&self) -> HdvolResult<usize> {
        let mut recorded = 0;
        for volume in self.list()? {
            let name = &volume.name;
            let device = self.open(name).and_then(|image| {
                image
                    .attached_device()
                    .map_err(|e| HdvolError::image("inspect", name.as_str(), e))
            });
            match device {
                Ok(Some(device)) => {
                    if self.mounts.insert(name, device.as_str()) {
                        tracing::info!(%name, %device, "Found attached volume");
                        recorded += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%name, error = %e, "Can't inspect volume"),
            }
        }
        Ok(recorded)
    }

    fn open(&self, name: &VolumeName) -> HdvolResult<Box<dyn ImageHandle>> {
        self.engine
            .open(&self.paths.descriptor(name))
            .map_err(|e| HdvolError::image("open", name.as_str(), e))
    }

    fn info(&self, name: &VolumeName) -> VolumeInfo {
        let created_at = fs::metadata(self.paths.descriptor(name))
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        let entry = self.mounts.lookup(name);

        VolumeInfo {
            name: name.clone(),
            mountpoint: self.paths.mountpoint(name),
            created_at,
            mount_count: entry.as_ref().map_or(0, |e| e.count),
            device: entry.map(|e| e.device),
        }
    }

    fn require(&self, name: &VolumeName) -> HdvolResult<()> {
        if self.exists(name)? {
            Ok(())
        } else {
            Err(HdvolError::VolumeNotFound {
                name: name.to_string(),
            })
        }
    }

    /// Whether the volume's descriptor is present.
    fn exists(&self, name: &VolumeName) -> HdvolResult<bool> {
        let descriptor = self.paths.descriptor(name);
        match fs::metadata(&descriptor) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                tracing::error!(path = %descriptor.display(), error = %e, "Unexpected error from stat");
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for VolumeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDriver")
            .field("paths", &self.paths)
            .field("defaults", &self.defaults)
            .field("vstorage", &self.vstorage)
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> HdvolResult<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().mode(0o700).create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> HdvolResult<()> {
    fs::create_dir(path)?;
    Ok(())
}
