//! # Observability
//!
//! One-call tracing setup for the outbox binaries.
//!
//! Services call `observability::init()` once at startup and use the
//! standard `tracing` macros everywhere else. `RUST_LOG` overrides the
//! configured default level.
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("event-outbox");
//!     tracing::info!("service started");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "event-outbox".into(),
//!     default_level: "debug".into(),
//!     format: observability::LogFormat::Json,
//!     ..Default::default()
//! })?;
//! ```

mod writer;

pub use writer::LogFileWriter;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Line format for stderr output. File output is always JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written in the startup line.
    pub service_name: String,

    /// Default level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by the `RUST_LOG` environment variable.
    pub default_level: String,

    pub format: LogFormat,

    /// Optional JSONL log file. Without one, logs go to stderr.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr when a log file is set.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    // stderr only, nothing to open
    let _ = init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Fails only if the log file cannot be opened. A second call in the same
/// process leaves the first subscriber in place.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if let Some(path) = &config.log_path {
        let writer = LogFileWriter::new(path)?;
        layers.push(
            fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }
    if config.log_path.is_none() || config.also_stderr {
        layers.push(stderr_layer(config.format));
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let installed = tracing_subscriber::registry()
        .with(layers.with_filter(filter))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = ?config.log_path,
            "observability initialized"
        );
    }
    Ok(())
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    let layer = fmt::layer().with_target(true).with_writer(io::stderr);
    match format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};
