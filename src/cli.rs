//! §6 external interface: `clap` derive CLI, matching the original's flag
//! names and defaults.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "varc", about = "Live forensic volatile-artifact collector")]
pub struct Cli {
    /// Disable memory dumping.
    #[arg(long)]
    pub skip_memory: bool,

    /// Disable copying files referenced by live processes.
    #[arg(long)]
    pub skip_open: bool,

    /// Disable multi-monitor screenshot capture.
    #[arg(long)]
    pub skip_screenshot: bool,

    /// Run the carver over every produced memory dump.
    #[arg(long)]
    pub dump_extract: bool,

    /// Enable the scan gate using a compiled rule file at this path.
    #[arg(long, value_name = "PATH")]
    pub yara_scan: Option<PathBuf>,

    /// Restrict collection to the process with this name.
    #[arg(long, value_name = "NAME", conflicts_with = "process_id")]
    pub process_name: Option<String>,

    /// Restrict collection to the process with this PID.
    #[arg(long, value_name = "PID")]
    pub process_id: Option<u32>,

    /// Output archive path. `.tar.lz4` selects the lz4-framed tar sink;
    /// anything else is written as a deflated zip.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Path to the log file.
    #[arg(long, value_name = "PATH", default_value = "varc.log")]
    pub log_file: PathBuf,

    /// Ignored positional arguments, preserved for test-harness compatibility.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra: Vec<String>,
}
