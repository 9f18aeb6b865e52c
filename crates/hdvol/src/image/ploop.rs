//! Image engine driving the `ploop` tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hdvol_common::paths::IMAGE_FILE;
use hdvol_common::{HdvolError, HdvolResult};

use super::{CreateParams, ImageEngine, ImageHandle};
use crate::tool::{Capture, ToolRunner};

/// Default image tool.
pub const PLOOP_TOOL: &str = "ploop";

/// Where the kernel lists block devices.
pub const SYSFS_BLOCK: &str = "/sys/block";

/// `ploop` exit status for "device is not mounted".
const EXIT_DEV_NOT_MOUNTED: i32 = 40;

/// Filesystem created inside new images.
const IMAGE_FS: &str = "ext4";

/// [`ImageEngine`] running the `ploop` command-line tool.
#[derive(Clone)]
pub struct PloopEngine {
    runner: Arc<dyn ToolRunner>,
    program: String,
    sysfs_block: PathBuf,
}

impl PloopEngine {
    /// Create an engine running [`PLOOP_TOOL`] and reading [`SYSFS_BLOCK`].
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            runner,
            program: PLOOP_TOOL.to_string(),
            sysfs_block: PathBuf::from(SYSFS_BLOCK),
        }
    }

    /// Use a different `ploop` binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Read block device state from a different sysfs directory.
    #[must_use]
    pub fn with_sysfs_block(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sysfs_block = dir.into();
        self
    }

    fn run(&self, args: Vec<String>, capture: Capture) -> HdvolResult<String> {
        self.runner.run(&self.program, &args, capture)
    }
}

impl std::fmt::Debug for PloopEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PloopEngine")
            .field("program", &self.program)
            .field("sysfs_block", &self.sysfs_block)
            .finish_non_exhaustive()
    }
}

impl ImageEngine for PloopEngine {
    fn create(&self, params: &CreateParams<'_>) -> HdvolResult<()> {
        let args = vec![
            "init".to_string(),
            "-s".to_string(),
            format!("{}K", params.size.as_kib()),
            "-f".to_string(),
            params.mode.to_string(),
            "-b".to_string(),
            (1u32 << params.clog).to_string(),
            "-t".to_string(),
            IMAGE_FS.to_string(),
            params.image.display().to_string(),
        ];
        self.run(args, Capture::Discard)?;
        Ok(())
    }

    fn open(&self, descriptor: &Path) -> HdvolResult<Box<dyn ImageHandle>> {
        if !descriptor.is_file() {
            return Err(HdvolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", descriptor.display()),
            )));
        }

        let dir = descriptor.parent().unwrap_or_else(|| Path::new("/"));
        Ok(Box::new(PloopImage {
            engine: self.clone(),
            descriptor: descriptor.to_path_buf(),
            image: dir.join(IMAGE_FILE),
        }))
    }
}

/// An image opened through its descriptor.
struct PloopImage {
    engine: PloopEngine,
    descriptor: PathBuf,
    image: PathBuf,
}

impl PloopImage {
    /// Find the ploop device whose top delta is our image.
    fn find_device(&self) -> HdvolResult<Option<String>> {
        let entries = match fs::read_dir(&self.engine.sysfs_block) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("ploop") {
                continue;
            }

            let Ok(image) = fs::read_to_string(entry.path().join("pdelta/0/image")) else {
                continue;
            };
            if Path::new(image.trim()) == self.image {
                return Ok(Some(format!("/dev/{name}")));
            }
        }

        Ok(None)
    }
}

impl ImageHandle for PloopImage {
    fn attached_device(&self) -> HdvolResult<Option<String>> {
        self.find_device()
    }

    fn attach(&self, mountpoint: &Path) -> HdvolResult<String> {
        let args = vec![
            "mount".to_string(),
            "-m".to_string(),
            mountpoint.display().to_string(),
            self.descriptor.display().to_string(),
        ];
        let out = self.engine.run(args, Capture::Stdout)?;

        if let Some(dev) = device_from_output(&out) {
            return Ok(dev);
        }
        self.find_device()?.ok_or_else(|| HdvolError::Internal {
            message: format!("{} mounted but no device found", self.descriptor.display()),
        })
    }

    fn detach(&self) -> HdvolResult<()> {
        let args = vec!["umount".to_string(), self.descriptor.display().to_string()];
        match self.engine.run(args, Capture::Discard) {
            Err(HdvolError::Tool { code, .. }) if code == EXIT_DEV_NOT_MOUNTED => {
                Err(HdvolError::NotAttached {
                    image: self.descriptor.display().to_string(),
                })
            }
            other => other.map(|_| ()),
        }
    }
}

/// Pick the `/dev/ploopN` device out of `ploop mount` output.
fn device_from_output(out: &str) -> Option<String> {
    out.split(|c: char| c.is_whitespace() || c == '=' || c == ',')
        .find(|tok| tok.starts_with("/dev/ploop"))
        .map(|tok| {
            // Partition devices (/dev/ploop123p1) belong to /dev/ploop123.
            let digits = tok["/dev/ploop".len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .count();
            tok[.."/dev/ploop".len() + digits].to_string()
        })
}
