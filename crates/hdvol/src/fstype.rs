//! Filesystem type lookup.
//!
//! Given a file or directory, finds the filesystem it is on by matching its
//! `st_dev` against the `major:minor` field of the host mount table.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use hdvol_common::{HdvolError, HdvolResult};

/// Mount table of the current process.
pub const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Filesystem type backing `path`, read from [`MOUNTINFO`].
///
/// # Errors
///
/// Returns an error if `path` can't be stat'ed, or the mount table can't be
/// read or parsed.
pub fn filesystem_type(path: &Path) -> HdvolResult<Option<String>> {
    filesystem_type_in(path, Path::new(MOUNTINFO))
}

/// Filesystem type backing `path`, read from the given mount table.
///
/// Returns `None` when no mount table record matches.
///
/// # Errors
///
/// Returns an error if `path` can't be stat'ed, or the mount table can't be
/// read or parsed.
pub fn filesystem_type_in(path: &Path, mountinfo: &Path) -> HdvolResult<Option<String>> {
    let st = rustix::fs::stat(path).map_err(std::io::Error::from)?;
    let dev = u64::from(st.st_dev);
    let table = File::open(mountinfo)?;
    fs_type_by_dev(BufReader::new(table), dev)
}

/// Scan mountinfo records for the first one whose device equals `dev`.
///
/// # Errors
///
/// Fails on the first malformed record instead of skipping it.
pub fn fs_type_by_dev(reader: impl BufRead, dev: u64) -> HdvolResult<Option<String>> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record = MountRecord::parse(&line)?;
        if record.dev == dev {
            return Ok(Some(record.fs_type.to_string()));
        }
    }

    Ok(None)
}

/// The two mountinfo fields we care about.
#[derive(Debug, PartialEq, Eq)]
struct MountRecord<'a> {
    dev: u64,
    fs_type: &'a str,
}

impl<'a> MountRecord<'a> {
    // 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
    //       ^^^^ st_dev                             ^^^^ filesystem type
    fn parse(line: &'a str) -> HdvolResult<Self> {
        let malformed = |reason: &str| HdvolError::MountInfo {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        // Optional fields end with a lone "-"; six mandatory fields precede them.
        let separator = fields
            .iter()
            .skip(6)
            .position(|f| *f == "-")
            .map(|p| p + 6)
            .ok_or_else(|| malformed("short line"))?;
        let fs_type = fields
            .get(separator + 1)
            .ok_or_else(|| malformed("missing filesystem type"))?;
        let dev = parse_dev(fields[2]).ok_or_else(|| malformed("can't parse device"))?;

        Ok(Self { dev, fs_type })
    }
}

/// Convert a `major:minor` string into the kernel's `dev_t` encoding.
fn parse_dev(s: &str) -> Option<u64> {
    let (major, minor) = s.split_once(':')?;
    Some(rustix::fs::makedev(major.parse().ok()?, minor.parse().ok()?))
}
