//! Volume name validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{HdvolError, HdvolResult};

/// A validated volume name.
///
/// Volume names become a single directory component under the driver home,
/// so they must:
/// - Be 1-255 bytes long
/// - Not contain `/` or NUL
/// - Not be `.` or `..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeName(String);

impl VolumeName {
    /// Maximum length of a volume name, in bytes.
    pub const MAX_LENGTH: usize = 255;

    /// Create a new volume name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::InvalidVolumeName`] if the name would not map to a
    /// single path component.
    pub fn new(name: impl Into<String>) -> HdvolResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the volume name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> HdvolResult<()> {
        let bad = name.is_empty()
            || name.len() > Self::MAX_LENGTH
            || name == "."
            || name == ".."
            || name.contains(['/', '\0']);

        if bad {
            return Err(HdvolError::InvalidVolumeName {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VolumeName {
    type Err = HdvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VolumeName {
    type Error = HdvolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<VolumeName> for String {
    fn from(name: VolumeName) -> Self {
        name.0
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
