//! Cluster storage (vstorage) client.

use std::path::Path;
use std::sync::Arc;

use hdvol_common::HdvolResult;

use crate::fstype;
use crate::tool::{Capture, ToolRunner};

/// Filesystem type reported for vstorage mounts.
pub const VSTORAGE_FS_TYPE: &str = "fuse.vstorage";

/// Default control tool.
pub const VSTORAGE_TOOL: &str = "vstorage";

/// Sets storage attributes through the `vstorage` tool.
#[derive(Clone)]
pub struct Vstorage {
    runner: Arc<dyn ToolRunner>,
    program: String,
}

impl Vstorage {
    /// Create a client that runs [`VSTORAGE_TOOL`].
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self::with_program(runner, VSTORAGE_TOOL)
    }

    /// Create a client that runs a custom program.
    pub fn with_program(runner: Arc<dyn ToolRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Set the storage tier of `path` recursively.
    ///
    /// Negative tiers mean "use the cluster default" and do nothing.
    ///
    /// # Errors
    ///
    /// Returns the tool failure.
    pub fn set_tier(&self, path: &Path, tier: i8) -> HdvolResult<()> {
        if tier < 0 {
            return Ok(());
        }

        let args = vec![
            "set-attr".to_string(),
            "-R".to_string(),
            path.display().to_string(),
            format!("tier={tier}"),
        ];
        self.runner.run(&self.program, &args, Capture::Discard)?;
        Ok(())
    }
}

impl std::fmt::Debug for Vstorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vstorage")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

/// Check if a file or directory is on vstorage.
///
/// Lookup failures are logged and count as "not on vstorage".
pub fn is_on_vstorage(path: &Path, mountinfo: &Path) -> bool {
    match fstype::filesystem_type_in(path, mountinfo) {
        Ok(fs) => fs.as_deref() == Some(VSTORAGE_FS_TYPE),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Can't figure out filesystem type");
            false
        }
    }
}
