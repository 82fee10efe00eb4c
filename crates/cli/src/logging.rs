//! Log output for the CLI
//!
//! Diagnostics go to stderr so stdout stays clean for command output
//! (`status --json` in particular).

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    pub json_format: bool,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            json_format: false,
        }
    }

    pub fn json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }

    tracing::debug!(level = %config.level, json = config.json_format, "logging initialized");
    Ok(())
}
