//! Volume options and their per-request overrides.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use hdvol_common::{ByteSize, HdvolError, HdvolResult};
use serde::{Deserialize, Serialize};

use crate::image::ImageMode;

/// Default image size.
pub const DEFAULT_SIZE: ByteSize = ByteSize::from_gib(16);

/// Default cluster block log size: 2^11 * 512 bytes = 1 MiB clusters.
pub const DEFAULT_CLOG: u8 = 11;

/// Supported cluster block log sizes.
pub const CLOG_RANGE: std::ops::RangeInclusive<u8> = 6..=15;

/// Tier value meaning "leave the cluster default".
pub const DEFAULT_TIER: i8 = -1;

/// Where volumes are visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Only on this host.
    Local,
    /// Cluster-wide.
    Global,
    /// Decide from the home directory's filesystem.
    #[default]
    Auto,
}

impl Scope {
    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = HdvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            "auto" => Ok(Self::Auto),
            _ => Err(HdvolError::invalid_option(
                "scope",
                s,
                "expected local, global or auto",
            )),
        }
    }
}

/// Options a volume is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOptions {
    /// Image capacity.
    pub size: ByteSize,
    /// Image layout.
    pub mode: ImageMode,
    /// Cluster block log size, in 512-byte sectors.
    pub clog: u8,
    /// Storage tier; negative means "don't set".
    pub tier: i8,
    /// Volume scope.
    pub scope: Scope,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            mode: ImageMode::default(),
            clog: DEFAULT_CLOG,
            tier: DEFAULT_TIER,
            scope: Scope::default(),
        }
    }
}

impl VolumeOptions {
    /// Set the size from a human-readable quantity such as `16GB`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a size.
    pub fn set_size(&mut self, value: &str) -> HdvolResult<()> {
        self.size = ByteSize::parse(value)?;
        Ok(())
    }

    /// Set the image layout.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown layouts.
    pub fn set_mode(&mut self, value: &str) -> HdvolResult<()> {
        self.mode = value.parse()?;
        Ok(())
    }

    /// Set the cluster block log size.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a number in [`CLOG_RANGE`].
    pub fn set_clog(&mut self, value: &str) -> HdvolResult<()> {
        let clog: u8 = value
            .trim()
            .parse()
            .map_err(|e| HdvolError::invalid_option("clog", value, e))?;
        if !CLOG_RANGE.contains(&clog) {
            return Err(HdvolError::invalid_option(
                "clog",
                value,
                format!(
                    "must be between {} and {}",
                    CLOG_RANGE.start(),
                    CLOG_RANGE.end()
                ),
            ));
        }
        self.clog = clog;
        Ok(())
    }

    /// Set the storage tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a signed 8-bit number.
    pub fn set_tier(&mut self, value: &str) -> HdvolResult<()> {
        self.tier = value
            .trim()
            .parse()
            .map_err(|e| HdvolError::invalid_option("tier", value, e))?;
        Ok(())
    }

    /// Set the scope.
    ///
    /// # Errors
    ///
    /// Returns an error unless the value is `local`, `global` or `auto`.
    pub fn set_scope(&mut self, value: &str) -> HdvolResult<()> {
        self.scope = value.parse()?;
        Ok(())
    }

    /// Apply per-request overrides on top of these options.
    ///
    /// Fields are applied in a fixed order and the first failure aborts;
    /// unknown keys are rejected after all known ones parse. A request for
    /// `auto` scope keeps the scope of `self`.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option.
    pub fn resolve(&self, overrides: &HashMap<String, String>) -> HdvolResult<Self> {
        type Setter = fn(&mut VolumeOptions, &str) -> HdvolResult<()>;
        const SETTERS: [(&str, Setter); 5] = [
            ("size", VolumeOptions::set_size),
            ("mode", VolumeOptions::set_mode),
            ("clog", VolumeOptions::set_clog),
            ("tier", VolumeOptions::set_tier),
            ("scope", VolumeOptions::set_scope),
        ];

        let mut opts = *self;
        for (key, set) in SETTERS {
            if let Some(value) = overrides.get(key) {
                set(&mut opts, value)?;
            }
        }

        let mut unknown: Vec<&String> = overrides
            .keys()
            .filter(|k| !SETTERS.iter().any(|(known, _)| *known == k.as_str()))
            .collect();
        unknown.sort();
        if let Some(key) = unknown.first() {
            return Err(HdvolError::invalid_option(
                key.as_str(),
                overrides[key.as_str()].as_str(),
                "unknown option",
            ));
        }

        if opts.scope == Scope::Auto {
            opts.scope = self.scope;
        }
        Ok(opts)
    }
}
