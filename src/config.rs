//! §3 `CollectorConfig`: the fully-resolved set of options one collection
//! run is parameterized by, built once from CLI flags plus defaults and
//! threaded immutably through every component.

use crate::errors::StartupError;
use crate::inventory::ProcessFilter;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_MAX_OPEN_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub process_filter: ProcessFilter,
    pub include_memory: bool,
    pub include_open: bool,
    pub take_screenshot: bool,
    pub extract_dumps: bool,
    pub yara_rule_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub max_chunk_bytes: u64,
    pub max_open_file_bytes: u64,
    pub scan_timeout: Duration,
}

impl CollectorConfig {
    /// Builds and validates a config. `process_name`/`process_id` are
    /// mutually exclusive; supplying both is an [`StartupError::InvalidSelection`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process_name: Option<String>,
        process_id: Option<u32>,
        include_memory: bool,
        include_open: bool,
        take_screenshot: bool,
        extract_dumps: bool,
        yara_rule_path: Option<PathBuf>,
        output_path: PathBuf,
    ) -> Result<Self, StartupError> {
        if !matches!(std::env::consts::OS, "linux" | "android" | "windows" | "macos" | "ios") {
            return Err(StartupError::MissingOperatingSystemInfo);
        }

        let process_filter = match (process_name, process_id) {
            (Some(_), Some(_)) => return Err(StartupError::InvalidSelection),
            (Some(name), None) => ProcessFilter::ByName(name),
            (None, Some(pid)) => ProcessFilter::ByPid(pid),
            (None, None) => ProcessFilter::All,
        };

        Ok(CollectorConfig {
            process_filter,
            include_memory,
            include_open,
            take_screenshot,
            extract_dumps,
            yara_rule_path,
            output_path,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            max_open_file_bytes: DEFAULT_MAX_OPEN_FILE_BYTES,
            scan_timeout: crate::scan::DEFAULT_SCAN_TIMEOUT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_name_and_id() {
        let result = CollectorConfig::new(
            Some("evil.exe".to_string()),
            Some(42),
            true,
            true,
            false,
            false,
            None,
            PathBuf::from("out.zip"),
        );
        assert!(matches!(result, Err(StartupError::InvalidSelection)));
    }

    #[test]
    fn accepts_neither_filter() {
        let result = CollectorConfig::new(
            None,
            None,
            true,
            true,
            false,
            false,
            None,
            PathBuf::from("out.zip"),
        );
        assert!(result.is_ok());
    }
}
