use clap::Parser;
use std::io::Write;
use varc::cli::Cli;
use varc::collector::{default_output_path, Collector};
use varc::config::CollectorConfig;

/// Writes every log line to both stderr and the configured log file,
/// porting the original CLI's `logging.basicConfig` with a `FileHandler`
/// and a `StreamHandler` attached to the same logger.
struct TeeWriter {
    file: std::fs::File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(log_file: &std::path::Path) {
    let file = match std::fs::OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open log file {}: {e}", log_file.display());
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_file);

    let output_path = cli.output.clone().unwrap_or_else(default_output_path);

    let config = match CollectorConfig::new(
        cli.process_name,
        cli.process_id,
        !cli.skip_memory,
        !cli.skip_open,
        !cli.skip_screenshot,
        cli.dump_extract,
        cli.yara_scan,
        output_path,
    ) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = Collector::new(config).run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}
