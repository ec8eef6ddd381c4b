//! # Structured Logging
//!
//! Installs a `tracing` subscriber for binaries and test harnesses that
//! embed the vault client. The library itself only emits events; nothing
//! here runs unless a caller asks for it.
//!
//! Events carry vault ids, addresses and public seed prefixes. Master
//! secrets, private seeds and private keys never reach a log field.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{QuipError, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for local development.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

impl LogFormat {
    /// Parse `"json"` or `"pretty"` (any case). Anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `default_level` when set, e.g.
///
/// ```text
/// RUST_LOG=quip_protocol=debug,quip_contracts=info
/// ```
///
/// Fails with [`QuipError::Config`] if the directive does not parse or a
/// global subscriber is already installed.
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| QuipError::Config(format!("bad log directive {default_level:?}: {e}")))?,
    };

    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| QuipError::Config(format!("logging already initialized: {e}")))?;

    tracing::debug!(format = ?format, "logging initialized");
    Ok(())
}
