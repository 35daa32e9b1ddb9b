//! Logging setup.
//!
//! One `init` call at process startup wires up to two tracing layers under
//! a shared `RUST_LOG`-style filter: an optional human-readable stderr
//! layer and an optional append-mode file layer. Either can be disabled,
//! and spans still work with both off.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log verbosity, lowest to highest severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

/// Logging configuration.
pub struct LogConfig {
    /// Print logs to stderr.
    pub print: bool,
    /// Minimum level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Include file/line info in stderr logs.
    pub include_location: bool,
    /// Also append logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            print: false,
            level: LogLevel::Info,
            include_location: false,
            file: None,
        }
    }
}

/// Initialize logging. Call once at startup.
///
/// `RUST_LOG` overrides `config.level` when set. A log file that cannot be
/// opened is skipped silently rather than failing startup.
pub fn init(config: LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let stderr_layer = config.print.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
    });

    let file_layer = config
        .file
        .as_deref()
        .and_then(open_log_file)
        .map(|file| fmt::layer().with_writer(Arc::new(file)).with_ansi(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Open a log file for appending, creating parent directories as needed.
fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok()?;
        }
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}

/// The default log file path, under the platform's local data directory.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("sandboot").join("logs").join("sandboot.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("debug".parse(), Ok(LogLevel::Debug));
        assert_eq!("DEBUG".parse(), Ok(LogLevel::Debug));
        assert_eq!("invalid".parse::<LogLevel>(), Err(()));
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(!config.print);
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_default_log_path_shape() {
        if let Some(path) = default_log_path() {
            assert!(path.ends_with("sandboot/logs/sandboot.log"));
        }
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("dirs").join("out.log");

        let file = open_log_file(&path);
        assert!(file.is_some());
        assert!(path.exists());

        // Append mode: reopening must not fail or truncate.
        std::fs::write(&path, b"line\n").unwrap();
        assert!(open_log_file(&path).is_some());
        assert_eq!(std::fs::read(&path).unwrap(), b"line\n");
    }
}
