//! Human-readable byte quantities.
//!
//! Sizes use binary multiples regardless of spelling, the way container
//! tooling treats memory sizes: "16GB", "16G", "16GiB" and "16g" all mean
//! 16 * 1024^3 bytes. Fractions are accepted ("1.5G").

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HdvolError, HdvolResult};

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?) ?([kKmMgGtTpP])?[iI]?[bB]?$").expect("size regex is valid")
});

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;
const PIB: u64 = TIB * 1024;

/// A byte quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Create a size from gibibytes.
    #[must_use]
    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * GIB)
    }

    /// Size in kibibytes (truncated).
    #[must_use]
    pub const fn as_kib(&self) -> u64 {
        self.0 / KIB
    }

    /// Parse a human-readable size such as `16GB`, `512m` or `1.5 GiB`.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::InvalidOption`] if the string is not a size.
    pub fn parse(s: &str) -> HdvolResult<Self> {
        let invalid = |reason: &str| HdvolError::invalid_option("size", s, reason);

        let caps = SIZE_RE
            .captures(s.trim())
            .ok_or_else(|| invalid("invalid size"))?;

        let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
            None => 1,
            Some(unit) => match unit.as_str() {
                "k" => KIB,
                "m" => MIB,
                "g" => GIB,
                "t" => TIB,
                "p" => PIB,
                _ => return Err(invalid("unknown unit")),
            },
        };

        let number = &caps[1];
        let bytes = if let Ok(whole) = number.parse::<u64>() {
            whole
                .checked_mul(multiplier)
                .ok_or_else(|| invalid("size too large"))?
        } else {
            let value: f64 = number.parse().map_err(|_| invalid("invalid size"))?;
            let bytes = value * multiplier as f64;
            if !bytes.is_finite() || bytes >= u64::MAX as f64 {
                return Err(invalid("size too large"));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bytes = bytes as u64;
            bytes
        };

        Ok(Self(bytes))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, suffix) in [(PIB, "PiB"), (TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")] {
            if self.0 >= unit && self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        write!(f, "{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = HdvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
