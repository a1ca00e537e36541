use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::AppError;

#[derive(Debug)]
struct SimpleLogger {
    log_path: PathBuf,
    level: Level,
}

static LOGGER: OnceCell<SimpleLogger> = OnceCell::new();

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_entry = format_entry(record);
            let log_file = self.log_path.join("log.txt");

            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_file) {
                let _ = file.write_all(log_entry.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

fn format_entry(record: &Record) -> String {
    format!(
        "{} [{}] {} - {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.args()
    )
}

// Default location of the log file: <home>/mystery_cast/data.
pub fn data_dir() -> io::Result<PathBuf> {
    dir::home_dir()
        .map(|home| home.join("mystery_cast").join("data"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to get home directory"))
}

pub fn init(debug_mode: bool) -> Result<(), AppError> {
    init_in(&data_dir()?, debug_mode)
}

// Installs the file logger writing to `log_path/log.txt`. Only the first call wins.
pub fn init_in(log_path: &Path, debug_mode: bool) -> Result<(), AppError> {
    create_dir_all(log_path)?;

    let level = if debug_mode { Level::Debug } else { Level::Info };
    let logger = LOGGER.get_or_init(|| SimpleLogger {
        log_path: log_path.to_path_buf(),
        level,
    });

    log::set_logger(logger)?;
    log::set_max_level(if debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use tempfile::tempdir;

    #[test]
    fn second_init_reports_logger_error() {
        let dir = tempdir().unwrap();
        let _ = init_in(dir.path(), true);

        let second = init_in(dir.path(), true).unwrap_err();
        assert!(matches!(second, AppError::Logger(_)));
        assert!(second.source().is_some());
        assert!(second.to_string().starts_with("Logger error: "));
    }
}
