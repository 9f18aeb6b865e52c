//! Running external tools.
//!
//! Cluster storage and image management are driven through command-line
//! tools. [`ToolRunner`] is the narrow capability the rest of the crate uses,
//! so tests can swap in a recording fake.

use std::io::{BufRead, Cursor};
use std::process::{Command, Output, Stdio};

use hdvol_common::{HdvolError, HdvolResult};

/// What a caller wants back from a tool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Discard stdout.
    Discard,
    /// Capture stdout and return it.
    Stdout,
}

/// Runs an external program to completion.
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, blocking until it exits.
    ///
    /// Returns captured stdout (empty with [`Capture::Discard`]).
    ///
    /// # Errors
    ///
    /// Returns [`HdvolError::Tool`] carrying the exit status and the first
    /// line of stderr when the program fails. The status is -1 when the
    /// program was killed by a signal or could not be started.
    fn run(&self, program: &str, args: &[String], capture: Capture) -> HdvolResult<String>;
}

/// [`ToolRunner`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl ToolRunner for CommandRunner {
    fn run(&self, program: &str, args: &[String], capture: Capture) -> HdvolResult<String> {
        tracing::debug!(program, args = %args.join(" "), "Running tool");

        let stdout = match capture {
            Capture::Discard => Stdio::null(),
            Capture::Stdout => Stdio::piped(),
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| HdvolError::Tool {
                tool: program.to_string(),
                code: -1,
                message: e.to_string(),
            })?;

        check_output(program, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn check_output(program: &str, output: &Output) -> HdvolResult<()> {
    if output.status.success() {
        return Ok(());
    }

    Err(HdvolError::Tool {
        tool: program.to_string(),
        code: output.status.code().unwrap_or(-1),
        message: first_line(&output.stderr),
    })
}

/// First line of `bytes`, without the trailing newline.
fn first_line(bytes: &[u8]) -> String {
    Cursor::new(bytes)
        .lines()
        .next()
        .and_then(Result::ok)
        .unwrap_or_default()
}
