//! Logging setup
//!
//! Logs go to stderr (or the configured file) so that command output printed
//! on stdout stays machine-readable.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Filter from the configured level, `--verbose` and `RUST_LOG`
///
/// `RUST_LOG` directives win over the configured default.
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.level.to_lowercase().parse().unwrap_or(Level::INFO)
    };

    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    match (&config.log_file, config.log_to_file) {
        (Some(path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
        _ => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = build_filter(config, verbose);
    let writer = make_writer(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);

    let installed = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use tracing::info;

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Test that JSON output is parseable and carries structured fields
    #[test]
    fn test_json_output_format() {
        let capture = CaptureWriter::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!(execution_id = "abc", pid = 42u32, "Spawned managed process");
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(line["fields"]["execution_id"], "abc");
        assert_eq!(line["fields"]["pid"], 42);
        assert_eq!(line["level"], "INFO");
    }

    /// Test that verbose forces debug regardless of configured level
    #[test]
    fn test_verbose_filter() {
        let config = LoggingConfig {
            level: "error".to_string(),
            ..Default::default()
        };
        let filter = build_filter(&config, true);
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(filter.max_level_hint(), Some(Level::DEBUG.into()));
        }
    }

    /// Test that an unparseable level falls back to info
    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            ..Default::default()
        };
        let filter = build_filter(&config, false);
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(filter.max_level_hint(), Some(Level::INFO.into()));
        }
    }

    /// Test that the file writer is used when configured
    #[test]
    fn test_file_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolguard.log");
        let config = LoggingConfig {
            log_to_file: true,
            log_file: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };

        assert!(make_writer(&config).is_ok());
        assert!(path.exists());
    }
}
