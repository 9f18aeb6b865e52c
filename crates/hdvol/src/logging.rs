//! Tracing setup shared by the binaries.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// How much to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Informational messages and up.
    #[default]
    Normal,
    /// Per-request traces.
    Debug,
}

impl Verbosity {
    /// Filter directive applied when `RUST_LOG` is unset.
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Debug => "debug",
        }
    }
}

/// Build the filter for `verbosity`.
///
/// `RUST_LOG` wins unless logging is quiet.
#[must_use]
pub fn filter(verbosity: Verbosity) -> EnvFilter {
    if verbosity == Verbosity::Quiet {
        return EnvFilter::new(verbosity.directive());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()))
}

/// Install the global subscriber. Logs go to stderr so stdout stays usable
/// for command output.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init(verbosity: Verbosity) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter(verbosity))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives() {
        assert_eq!(Verbosity::Quiet.directive(), "error");
        assert_eq!(Verbosity::Normal.directive(), "info");
        assert_eq!(Verbosity::Debug.directive(), "debug");
    }

    #[test]
    fn quiet_ignores_env() {
        assert_eq!(filter(Verbosity::Quiet).to_string(), "error");
    }
}
