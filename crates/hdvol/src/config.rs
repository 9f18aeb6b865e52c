//! Driver configuration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use hdvol_common::HdvolResult;

use crate::driver::{VolumeDriver, VolumeOptions};
use crate::fstype::MOUNTINFO;
use crate::image::{PLOOP_TOOL, PloopEngine, SYSFS_BLOCK};
use crate::logging::Verbosity;
use crate::tool::CommandRunner;
use crate::vstorage::VSTORAGE_TOOL;

/// Settings the driver is built from.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Home directory holding `img/` and `mnt/`.
    pub home: PathBuf,
    /// Options for volumes created without overrides.
    pub defaults: VolumeOptions,
    /// Mount table used for filesystem type lookups.
    pub mountinfo: PathBuf,
    /// Block device directory in sysfs.
    pub sysfs_block: PathBuf,
    /// Image tool.
    pub ploop_tool: String,
    /// Cluster storage tool.
    pub vstorage_tool: String,
}

impl DriverConfig {
    /// Configuration with default options rooted at `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            defaults: VolumeOptions::default(),
            mountinfo: PathBuf::from(MOUNTINFO),
            sysfs_block: PathBuf::from(SYSFS_BLOCK),
            ploop_tool: PLOOP_TOOL.to_string(),
            vstorage_tool: VSTORAGE_TOOL.to_string(),
        }
    }

    /// Set the default volume options.
    #[must_use]
    pub const fn with_defaults(mut self, defaults: VolumeOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Read mounts from a different mount table.
    #[must_use]
    pub fn with_mountinfo(mut self, mountinfo: impl Into<PathBuf>) -> Self {
        self.mountinfo = mountinfo.into();
        self
    }

    /// Build a driver running the real tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver can't be set up; see [`VolumeDriver::new`].
    pub fn build(&self) -> HdvolResult<VolumeDriver> {
        let runner = Arc::new(CommandRunner);
        let engine = PloopEngine::new(runner.clone())
            .with_program(self.ploop_tool.clone())
            .with_sysfs_block(self.sysfs_block.clone());
        VolumeDriver::new(self, Arc::new(engine), runner)
    }
}

/// Command-line driver settings shared by the binaries.
#[derive(Args, Debug, Clone)]
pub struct DriverArgs {
    /// Directory to keep volumes in
    #[arg(long, global = true, env = "HDVOL_HOME", default_value = "/pcs")]
    pub home: PathBuf,

    /// Default volume size
    #[arg(long, global = true, env = "HDVOL_SIZE", default_value = "16GB")]
    pub size: String,

    /// Default image mode (expanded, preallocated, raw)
    #[arg(long, global = true, env = "HDVOL_MODE", default_value = "expanded")]
    pub mode: String,

    /// Default cluster block log size
    #[arg(long, global = true, env = "HDVOL_CLOG", default_value = "11")]
    pub clog: String,

    /// Default storage tier (-1 leaves the cluster default)
    #[arg(
        long,
        global = true,
        env = "HDVOL_TIER",
        default_value = "-1",
        allow_hyphen_values = true
    )]
    pub tier: String,

    /// Volume scope (local, global, auto)
    #[arg(long, global = true, env = "HDVOL_SCOPE", default_value = "auto")]
    pub scope: String,

    /// Image tool to run
    #[arg(long, global = true, env = "HDVOL_PLOOP", default_value = PLOOP_TOOL, hide = true)]
    pub ploop: String,

    /// Cluster storage tool to run
    #[arg(long, global = true, env = "HDVOL_VSTORAGE", default_value = VSTORAGE_TOOL, hide = true)]
    pub vstorage: String,

    /// Mount table consulted for `auto` scope
    #[arg(long, global = true, env = "HDVOL_MOUNTINFO", default_value = MOUNTINFO, hide = true)]
    pub mountinfo: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only log errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

impl DriverArgs {
    /// Parse the arguments into a [`DriverConfig`].
    ///
    /// # Errors
    ///
    /// Returns the first option that fails to parse.
    pub fn into_config(self) -> HdvolResult<DriverConfig> {
        let mut defaults = VolumeOptions::default();
        defaults.set_size(&self.size)?;
        defaults.set_mode(&self.mode)?;
        defaults.set_clog(&self.clog)?;
        defaults.set_tier(&self.tier)?;
        defaults.set_scope(&self.scope)?;

        let mut config = DriverConfig::new(self.home)
            .with_defaults(defaults)
            .with_mountinfo(self.mountinfo);
        config.ploop_tool = self.ploop;
        config.vstorage_tool = self.vstorage;
        Ok(config)
    }

    /// Logging verbosity requested by `--debug` / `--quiet`.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Scope;
    use crate::image::ImageMode;
    use clap::Parser;
    use hdvol_common::{ByteSize, HdvolError};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        driver: DriverArgs,
    }

    fn parse(args: &[&str]) -> DriverArgs {
        TestCli::try_parse_from(std::iter::once("hdvol").chain(args.iter().copied()))
            .unwrap()
            .driver
    }

    #[test]
    fn defaults() {
        let config = DriverConfig::new("/pcs");
        assert_eq!(config.mountinfo, PathBuf::from("/proc/self/mountinfo"));
        assert_eq!(config.sysfs_block, PathBuf::from("/sys/block"));
        assert_eq!(config.ploop_tool, "ploop");
        assert_eq!(config.vstorage_tool, "vstorage");
        assert_eq!(config.defaults, VolumeOptions::default());
    }

    #[test]
    fn args_parse_into_defaults() {
        let config = parse(&[
            "--home",
            "/srv/vols",
            "--size",
            "2G",
            "--mode",
            "raw",
            "--clog",
            "8",
            "--tier",
            "-1",
            "--scope",
            "global",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/vols"));
        assert_eq!(config.defaults.size, ByteSize::from_gib(2));
        assert_eq!(config.defaults.mode, ImageMode::Raw);
        assert_eq!(config.defaults.clog, 8);
        assert_eq!(config.defaults.tier, -1);
        assert_eq!(config.defaults.scope, Scope::Global);
    }

    #[test]
    fn mountinfo_override() {
        assert_eq!(
            parse(&[]).into_config().unwrap().mountinfo,
            PathBuf::from(MOUNTINFO)
        );
        let config = parse(&["--mountinfo", "/run/hdvol/mountinfo"])
            .into_config()
            .unwrap();
        assert_eq!(config.mountinfo, PathBuf::from("/run/hdvol/mountinfo"));
    }

    #[test]
    fn bad_default_is_fatal() {
        let err = parse(&["--size", "huge"]).into_config().unwrap_err();
        assert!(matches!(err, HdvolError::InvalidOption { ref option, .. } if option == "size"));
    }

    #[test]
    fn debug_and_quiet_conflict() {
        assert!(TestCli::try_parse_from(["hdvol", "--debug", "--quiet"]).is_err());
        assert_eq!(parse(&["--debug"]).verbosity(), Verbosity::Debug);
        assert_eq!(parse(&["--quiet"]).verbosity(), Verbosity::Quiet);
    }
}
