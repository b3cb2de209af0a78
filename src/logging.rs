//! Logger setup shared by the binary and tests

use crate::types::{CwcError, CwcResult};
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

const TIME_FORMAT: &str = "%Y-%m-%d,%H:%M:%S";

/// Parse a level name such as `INFO` or `debug`; `WARNING` is accepted as `warn`
pub fn parse_level(level: &str) -> CwcResult<LevelFilter> {
    let normalized = match level.trim().to_uppercase().as_str() {
        "WARNING" => "WARN".to_string(),
        "CRITICAL" | "FATAL" => "ERROR".to_string(),
        other => other.to_string(),
    };
    LevelFilter::from_str(&normalized)
        .map_err(|_| CwcError::Config(format!("Unknown log level: {}", level)))
}

/// Write one record as `LEVEL:timestamp ||| message`
pub fn format_record<W: Write + ?Sized>(buf: &mut W, record: &log::Record) -> io::Result<()> {
    writeln!(
        buf,
        "{}:{} ||| {}",
        record.level(),
        chrono::Local::now().format(TIME_FORMAT),
        record.args()
    )
}

/// Open a log file for appending, creating it if missing
pub fn open_log_file(path: &Path) -> CwcResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Install the global logger, writing to `logfile` (appending) when given.
///
/// Lines look like `INFO:2024-01-31,12:00:00 ||| message`. A logger that
/// is already installed is left in place.
pub fn init_logging(level: &str, logfile: Option<&Path>) -> CwcResult<()> {
    let mut builder = Builder::new();
    builder.filter_level(parse_level(level)?);
    builder.format(|buf, record| format_record(buf, record));

    if let Some(path) = logfile {
        builder.target(Target::Pipe(Box::new(open_log_file(path)?)));
    }

    if builder.try_init().is_err() {
        log::debug!("Logger already initialised, keeping existing configuration");
    }
    Ok(())
}
