//! Process configuration from environment variables

use crate::outline::{OutlineSettings, DEFAULT_KEY_METHOD};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a whole number of seconds, got {value:?}")]
    Seconds { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub inventory_file: PathBuf,
    pub outline_method: String,
    /// Sessions idle this long are ended; `None` keeps them forever
    pub idle_timeout: Option<Duration>,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let seconds = |name: &'static str| -> Result<Option<Duration>, ConfigError> {
            var(name)
                .filter(|v| !v.trim().is_empty())
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map(Duration::from_secs)
                        .map_err(|_| ConfigError::Seconds { name, value })
                })
                .transpose()
        };

        Ok(Self {
            inventory_file: var("KEYDESK_INVENTORY_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .ok_or(ConfigError::Missing("KEYDESK_INVENTORY_FILE"))?,
            outline_method: var("KEYDESK_OUTLINE_METHOD")
                .unwrap_or_else(|| DEFAULT_KEY_METHOD.to_string()),
            idle_timeout: seconds("KEYDESK_IDLE_TIMEOUT_SECS")?,
            http_timeout: seconds("KEYDESK_HTTP_TIMEOUT_SECS")?
                .unwrap_or(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)),
        })
    }

    pub fn outline_settings(&self) -> OutlineSettings {
        OutlineSettings {
            method: self.outline_method.clone(),
            timeout: self.http_timeout,
        }
    }
}
