//! Configuration loading and representation.
//!
//! Values come from, in increasing precedence:
//! 1. Built-in defaults
//! 2. A JSON file named by `ORDERSTREAM_CONFIG` (optional)
//! 3. `ORDERSTREAM_*` environment variables
//!
//! Retry keys also accept the camelCase spelling (`initialIntervalMs`,
//! `maxIntervalMs`, `maxAttempts`) in the JSON file.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use orderstream_observability::LogFormat;

use crate::dead_letter::DeadLetterPolicy;
use crate::retry::{PolicyError, RetryPolicy, RetrySettings};

pub const CONFIG_FILE_VAR: &str = "ORDERSTREAM_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid retry policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    #[serde(alias = "initialIntervalMs")]
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    #[serde(alias = "maxIntervalMs")]
    pub max_interval_ms: u64,
    #[serde(alias = "maxAttempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 5000,
            multiplier: 1.0,
            max_interval_ms: 5000,
            max_attempts: 3,
        }
    }
}

impl RetryPolicyConfig {
    pub fn into_policy(self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::new(
            Duration::from_millis(self.initial_interval_ms),
            self.multiplier,
            Duration::from_millis(self.max_interval_ms),
            self.max_attempts,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub publish_attempts: u32,
    pub publish_backoff_ms: u64,
    /// Consumer group of the dead-letter observer.
    pub observer_group: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            publish_attempts: 3,
            publish_backoff_ms: 1000,
            observer_group: "order-consumer-group-v2".to_string(),
        }
    }
}

impl DeadLetterConfig {
    pub fn policy(&self) -> DeadLetterPolicy {
        DeadLetterPolicy {
            publish_attempts: self.publish_attempts,
            publish_backoff: Duration::from_millis(self.publish_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `memory://` or `redis://host:port`.
    pub broker_url: String,
    pub group_id: String,
    pub topic: String,
    /// Partition count for topics the broker has not seen yet (in-memory and Redis).
    pub partitions: u32,
    pub retry: RetryPolicyConfig,
    pub dead_letter: DeadLetterConfig,
    pub http_addr: String,
    pub log_format: LogFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker_url: "memory://".to_string(),
            group_id: "order-consumer-group-v2".to_string(),
            topic: "orders-topic".to_string(),
            partitions: 3,
            retry: RetryPolicyConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            http_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment (and the optional config file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_VAR) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|err| match err {
            ConfigError::Invalid { value, reason, .. } => ConfigError::Invalid {
                key: path.display().to_string(),
                value,
                reason,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Invalid {
            key: CONFIG_FILE_VAR.to_string(),
            value: String::new(),
            reason: err.to_string(),
        })
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overrides(lookup);

        env.string("ORDERSTREAM_BROKER_URL", &mut self.broker_url);
        env.string("ORDERSTREAM_GROUP_ID", &mut self.group_id);
        env.string("ORDERSTREAM_TOPIC", &mut self.topic);
        env.parse("ORDERSTREAM_PARTITIONS", &mut self.partitions)?;
        env.parse("ORDERSTREAM_INITIAL_INTERVAL_MS", &mut self.retry.initial_interval_ms)?;
        env.parse("ORDERSTREAM_MULTIPLIER", &mut self.retry.multiplier)?;
        env.parse("ORDERSTREAM_MAX_INTERVAL_MS", &mut self.retry.max_interval_ms)?;
        env.parse("ORDERSTREAM_MAX_ATTEMPTS", &mut self.retry.max_attempts)?;
        env.parse("ORDERSTREAM_DLT_PUBLISH_ATTEMPTS", &mut self.dead_letter.publish_attempts)?;
        env.parse("ORDERSTREAM_DLT_PUBLISH_BACKOFF_MS", &mut self.dead_letter.publish_backoff_ms)?;
        env.string("ORDERSTREAM_DLT_GROUP_ID", &mut self.dead_letter.observer_group);
        env.string("ORDERSTREAM_HTTP_ADDR", &mut self.http_addr);
        env.parse("ORDERSTREAM_LOG_FORMAT", &mut self.log_format)?;

        if self.partitions == 0 {
            return Err(ConfigError::Invalid {
                key: "partitions".to_string(),
                value: "0".to_string(),
                reason: "at least one partition is required".to_string(),
            });
        }
        Ok(())
    }

    /// Validated settings for the retrying consumers.
    pub fn retry_settings(&self) -> Result<RetrySettings, ConfigError> {
        let policy = self.retry.clone().into_policy()?;
        Ok(RetrySettings::new(self.group_id.clone(), policy).with_dead_letter(self.dead_letter.policy()))
    }
}

struct Overrides<'a, F>(&'a F);

impl<F> Overrides<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, slot: &mut String) {
        if let Some(value) = self.get(key) {
            *slot = value;
        }
    }

    fn parse<T>(&self, key: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(key) {
            *slot = value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: value.clone(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }
}
