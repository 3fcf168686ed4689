//! # Structured Logging
//!
//! The library only emits `tracing` events; the embedding app decides
//! where they go. [`init_logging`] is a ready-made subscriber for apps and
//! relay daemons that don't bring their own: `RUST_LOG`-style filtering
//! plus pretty or JSON lines on stderr.

use std::str::FromStr;

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output with file and line.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation on relay hosts.
    Json,
}

impl LogFormat {
    /// "json" (any case) is JSON; anything else is pretty.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_level` when set, e.g.
///
/// ```text
/// RUST_LOG=meshstealth_protocol::mesh=debug,meshstealth_protocol=info
/// ```
///
/// Fails if a global subscriber is already installed, which an app that
/// wires its own logging will usually have done.
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .try_init()?,
    }

    tracing::info!(?format, "logging initialized");
    Ok(())
}
