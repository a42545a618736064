//! Structured logging for Ferry simulation runs
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines for post-run analysis (default)
//! - **Pretty Console**: human-readable output for interactive runs
//! - **Host Context Injection**: spans opened while a host is being updated
//!   carry the host address and virtual time
//! - **File Output**: per-run or rotating log files via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use ferry_logging::{FerrySubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = FerrySubscriberBuilder::new().init()?;
//!
//! // Pretty console plus a JSONL run log
//! let _guard = FerrySubscriberBuilder::new()
//!     .with_config(LogConfig::simulation("out/logs".into()))
//!     .init()?;
//! ```
//!
//! # Host Context
//!
//! ```ignore
//! use ferry_logging::HostContextGuard;
//!
//! let _guard = HostContextGuard::new(HostAddress(3), now);
//! tracing::info!("Transfer finalized");
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{HostContextData, HostContextGuard, run_id};
pub use layers::{HostContextExtension, HostContextLayer, jsonl_file_layer};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global subscriber is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for configuring and installing the Ferry logging subscriber
///
/// By default, console output uses JSONL format. Use
/// [`LogConfig::development`] for human-readable output.
pub struct FerrySubscriberBuilder {
    config: LogConfig,
}

impl FerrySubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Switch the console between pretty and JSONL output
    pub fn with_pretty_console(mut self, pretty: bool) -> Self {
        self.config.console.pretty = pretty;
        self.config.console.ansi = pretty;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes the file writer on drop; keep it alive
    /// for the whole run.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));
        let console = &self.config.console;
        let jsonl = &self.config.jsonl;

        let (file_writer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                (Some(writer), Some(guard))
            }
            None => (None, None),
        };

        let pretty_console = (console.enabled && console.pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(console.ansi)
                .with_target(true)
        });

        let json_console = (console.enabled && !console.pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(jsonl.include_spans)
                .flatten_event(jsonl.flatten_events)
                .with_file(jsonl.include_location)
                .with_line_number(jsonl.include_location)
        });

        let file_layer = file_writer.map(|writer| {
            jsonl_file_layer(writer, jsonl.include_location, jsonl.include_thread_info)
        });

        Registry::default()
            .with(env_filter)
            .with(HostContextLayer::new())
            .with(pretty_console)
            .with(json_console)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }
}

impl Default for FerrySubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let writer = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(writer)
}

/// Install minimal logging for tests, ignoring an existing subscriber
pub fn init_testing() {
    let _ = FerrySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_builder_creation() {
        let builder = FerrySubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = FerrySubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config().default_level, "debug");
        assert!(builder.config().console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = FerrySubscriberBuilder::new()
            .with_level("trace")
            .with_console(false)
            .with_pretty_console(true);
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
        assert!(builder.config().console.ansi);
    }

    #[test]
    fn test_builder_file_output() {
        let builder = FerrySubscriberBuilder::new().with_file_output(FileConfig {
            directory: PathBuf::from("logs"),
            prefix: "run".to_string(),
            rotation: RotationStrategy::Daily,
        });
        let file = builder.config().file.as_ref().unwrap();
        assert_eq!(file.prefix, "run");
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_single_file_writer_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig {
            directory: dir.path().join("logs"),
            prefix: "run".to_string(),
            rotation: RotationStrategy::Never,
        };
        fs::create_dir_all(&config.directory).unwrap();
        fs::write(config.directory.join("run.log"), "stale").unwrap();

        let (_writer, guard) = file_writer(&config).unwrap();
        drop(guard);
        let contents = fs::read_to_string(config.directory.join("run.log")).unwrap();
        assert!(contents.is_empty());
    }
}
