//! On-disk namespace for volumes.
//!
//! Every volume lives in its own directory under `<home>/img`, holding the
//! image descriptor and the image itself. Mountpoints live under `<home>/mnt`.

use std::path::{Path, PathBuf};

use crate::name::VolumeName;

/// Descriptor file name. Its presence defines volume existence.
pub const DESCRIPTOR_FILE: &str = "DiskDescriptor.xml";

/// Image file name.
pub const IMAGE_FILE: &str = "root.hdd";

const IMAGES_DIR: &str = "img";
const MOUNTS_DIR: &str = "mnt";

/// Paths used by the driver, rooted at its home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePaths {
    /// Driver home directory.
    home: PathBuf,
}

impl VolumePaths {
    /// Create paths rooted at `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Root of all volume directories.
    #[must_use]
    pub fn images(&self) -> PathBuf {
        self.home.join(IMAGES_DIR)
    }

    /// Root of all mountpoints.
    #[must_use]
    pub fn mounts(&self) -> PathBuf {
        self.home.join(MOUNTS_DIR)
    }

    /// Directory holding a volume's descriptor and image.
    #[must_use]
    pub fn dir(&self, name: &VolumeName) -> PathBuf {
        self.images().join(name.as_str())
    }

    /// Volume descriptor file.
    #[must_use]
    pub fn descriptor(&self, name: &VolumeName) -> PathBuf {
        self.dir(name).join(DESCRIPTOR_FILE)
    }

    /// Volume image file.
    #[must_use]
    pub fn image(&self, name: &VolumeName) -> PathBuf {
        self.dir(name).join(IMAGE_FILE)
    }

    /// Mountpoint the volume is attached to.
    #[must_use]
    pub fn mountpoint(&self, name: &VolumeName) -> PathBuf {
        self.mounts().join(name.as_str())
    }

    /// Create the image and mountpoint roots.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        create_private_dir_all(&self.images())?;
        create_private_dir_all(&self.mounts())?;
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir_all(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir_all(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name(s: &str) -> VolumeName {
        VolumeName::new(s).unwrap()
    }

    #[test]
    fn volume_paths() {
        let paths = VolumePaths::new("/pcs");
        let vol = name("vol1");
        assert_eq!(paths.dir(&vol), PathBuf::from("/pcs/img/vol1"));
        assert_eq!(
            paths.descriptor(&vol),
            PathBuf::from("/pcs/img/vol1/DiskDescriptor.xml")
        );
        assert_eq!(paths.image(&vol), PathBuf::from("/pcs/img/vol1/root.hdd"));
        assert_eq!(paths.mountpoint(&vol), PathBuf::from("/pcs/mnt/vol1"));
    }

    #[test]
    fn roots() {
        let paths = VolumePaths::new("/tmp/hdvol-test");
        assert_eq!(paths.images(), PathBuf::from("/tmp/hdvol-test/img"));
        assert_eq!(paths.mounts(), PathBuf::from("/tmp/hdvol-test/mnt"));
    }

    proptest! {
        #[test]
        fn mountpoint_is_injective(a in "[a-zA-Z0-9._-]{1,40}", b in "[a-zA-Z0-9._-]{1,40}") {
            prop_assume!(a != b);
            let (Ok(a), Ok(b)) = (VolumeName::new(a), VolumeName::new(b)) else {
                return Ok(());
            };
            let paths = VolumePaths::new("/pcs");
            prop_assert_ne!(paths.mountpoint(&a), paths.mountpoint(&b));
            prop_assert_ne!(paths.dir(&a), paths.dir(&b));
        }

        #[test]
        fn mountpoint_stays_in_namespace(s in "[^/\\x00]{1,64}") {
            if let Ok(vol) = VolumeName::new(s) {
                let paths = VolumePaths::new("/pcs");
                let mnt = paths.mountpoint(&vol);
                let mounts = paths.mounts();
                prop_assert_eq!(mnt.parent(), Some(mounts.as_path()));
                prop_assert_eq!(paths.mountpoint(&vol), mnt);
            }
        }
    }
}
