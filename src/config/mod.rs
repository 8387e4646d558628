use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use anyhow::{ensure, Context};

use crate::core::queue::{QueueArguments, QueueLimits};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    pub virtual_host: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            virtual_host: "/".to_string(),
        }
    }
}

/// Defaults applied to every queue declared without explicit arguments.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct QueueDefaults {
    /// Bytes; 0 disables producer flow control.
    pub capacity: u64,
    pub flow_resume_capacity: u64,
    pub max_message_count: u64,
    pub max_message_size: u64,
    pub max_queue_depth: u64,
    pub max_message_age_ms: u64,
}

impl QueueDefaults {
    pub fn arguments(&self) -> QueueArguments {
        QueueArguments {
            capacity: self.capacity,
            flow_resume_capacity: self.flow_resume_capacity,
            limits: QueueLimits {
                max_message_count: self.max_message_count,
                max_message_size: self.max_message_size,
                max_queue_depth: self.max_queue_depth,
                max_message_age_ms: self.max_message_age_ms,
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub queues: QueueDefaults,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.broker.virtual_host.is_empty(),
            "broker.virtual_host must not be empty"
        );
        ensure!(
            self.queues.flow_resume_capacity <= self.queues.capacity,
            "queues.flow_resume_capacity ({}) must not exceed queues.capacity ({})",
            self.queues.flow_resume_capacity,
            self.queues.capacity
        );
        Ok(())
    }
}

pub fn parse_config(raw: &str) -> Result<Config, anyhow::Error> {
    let config: Config = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let path = path.as_ref();
    let raw: String = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("parsing config file {}", path.display()))
}
