//! Engine configuration.
//!
//! # Responsibility
//! - Hold record-limit, page-size and logging settings.
//! - Read overrides from `ENTITY_ENGINE_*` environment variables.
//!
//! # Invariants
//! - `record_limit` and `default_page_size` are never 0.
//! - Invalid overrides are errors, never silently replaced by defaults.

use crate::logging::default_log_level;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const ENV_LIMIT_RECORDS: &str = "ENTITY_ENGINE_LIMIT_RECORDS";
pub const ENV_PAGE_SIZE: &str = "ENTITY_ENGINE_PAGE_SIZE";
pub const ENV_LOG_LEVEL: &str = "ENTITY_ENGINE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "ENTITY_ENGINE_LOG_DIR";

const DEFAULT_RECORD_LIMIT: u32 = 10_000;
const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for any single bounded scan.
    pub record_limit: u32,
    pub default_page_size: u32,
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` leaves logging off.
    pub log_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            record_limit: DEFAULT_RECORD_LIMIT,
            default_page_size: DEFAULT_PAGE_SIZE,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { key: &'static str, value: String },
    ZeroValue { key: &'static str },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber { key, value } => {
                write!(f, "`{key}` must be a positive integer, got `{value}`")
            }
            Self::ZeroValue { key } => write!(f, "`{key}` must be greater than 0"),
        }
    }
}

impl Error for ConfigError {}

impl EngineConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup(key)` for each `ENTITY_ENGINE_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_LIMIT_RECORDS) {
            config.record_limit = parse_positive(ENV_LIMIT_RECORDS, &value)?;
        }
        if let Some(value) = lookup(ENV_PAGE_SIZE) {
            config.default_page_size = parse_positive(ENV_PAGE_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL).filter(|value| !value.trim().is_empty()) {
            config.log_level = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_LOG_DIR).filter(|value| !value.trim().is_empty()) {
            config.log_dir = Some(value.trim().to_string());
        }

        Ok(config)
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    let parsed = value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::ZeroValue { key });
    }
    Ok(parsed)
}
