//! The error taxonomy from the design doc, kept as small `thiserror` enums
//! per component rather than one grab-bag type, following the same shape the
//! `InitError` / `DumperError` / `ThreadInfoError` split uses upstream.

use serde::Serialize;
use std::path::PathBuf;

fn serialize_io_error<S>(err: &std::io::Error, ser: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    ser.serialize_str(&err.to_string())
}

/// Fatal, start-of-run errors. Anything else is recovered locally.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum StartupError {
    #[error("both --process-name and --process-id were given; only one selection is allowed")]
    InvalidSelection,
    #[error("failed to detect a supported operating system")]
    MissingOperatingSystemInfo,
    #[error("failed to open output archive")]
    ArchiveError(#[source] ArchiveError),
}

/// Errors from [`crate::region`] enumeration. Non-fatal: the dumper simply
/// skips a PID that fails here.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum RegionEnumerationError {
    #[error("access denied enumerating regions for pid {0}")]
    Denied(u32),
    #[error("pid {0} vanished while enumerating regions")]
    Vanished(u32),
    #[error("regions for pid {0} could not be listed")]
    NotAccessible(u32),
}

/// Errors from [`crate::reader`]. The dumper treats all of these as "skip
/// this chunk", except `Denied`/`Vanished` at handle-open time, which skip
/// the whole PID.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ReadError {
    #[error("access denied reading pid {0}")]
    Denied(u32),
    #[error("pid {0} vanished while reading")]
    Vanished(u32),
    #[error("chunk unreadable")]
    Unreadable,
}

/// Per-PID scan failure. Recorded, never fatal.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("YARA scan of pid {pid} failed: {reason}")]
pub struct ScanError {
    pub pid: u32,
    pub reason: String,
}

/// Rule compile/load failure. Disables the scan gate for the whole run.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("failed to load YARA rules from {path}: {reason}")]
pub struct RuleLoadError {
    pub path: PathBuf,
    pub reason: String,
}

/// Raised internally when a host-wide allocation failure is detected during
/// dumping. Recovered at the `ProcessDumper` level: further dumping is
/// abandoned but the run continues.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("host ran out of memory while dumping process {pid}")]
pub struct OutOfMemory {
    pub pid: u32,
}

/// Failure writing to the [`crate::archive::ArchiveSink`]. Always fatal.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ArchiveError {
    #[error("I/O error writing archive member {name}")]
    Io {
        name: String,
        #[source]
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("zip writer error for member {name}: {reason}")]
    Zip { name: String, reason: String },
}
