//! tracing subscriber setup
//!
//! The level applies to this crate; dependencies (AWS SDK, hyper) only log warnings unless
//! `RUST_LOG` says otherwise.

use crate::error::{MirrorError, Result};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LEVEL: &str = "info";

/// Parse a `LOG_LEVEL` value (trace, debug, info, warn, error)
pub fn parse_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| MirrorError::Config(format!("Invalid LOG_LEVEL: {}", level)))
}

fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,{}={}",
            env!("CARGO_CRATE_NAME"),
            level.as_str().to_lowercase()
        ))
    })
}

/// Install the global fmt subscriber
pub fn init(level: Option<&str>) -> Result<()> {
    let level = parse_level(level.unwrap_or(DEFAULT_LEVEL))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(false)
        .try_init()
        .map_err(|e| MirrorError::Config(format!("Could not initialise logging: {}", e)))
}
