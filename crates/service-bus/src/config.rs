//! # Bus Configuration
//!
//! String-keyed properties (as handed to `ServiceBus::start`) layered over
//! typed defaults. Every key, recognized or not, is kept in
//! [`BusConfig::properties`] and passed on to services.
//!
//! | Key | Default |
//! |---|---|
//! | `servicebus.transport` | `staged` |
//! | `servicebus.dir.base` | `./data` |
//! | `servicebus.deadletter.file` | `deadLetter.json` |
//! | `servicebus.deadletter.maxFileSize` | 10 MiB |
//! | `servicebus.deadletter.maxFiles` | 3 |
//! | `servicebus.shutdown.gracefulTimeoutSecs` | 30 |

use std::path::PathBuf;
use std::time::Duration;

use shared_bus::DEFAULT_TRANSPORT;
use shared_types::Properties;
use thiserror::Error;

pub const TRANSPORT_KEY: &str = "servicebus.transport";
pub const BASE_DIR_KEY: &str = "servicebus.dir.base";
pub const DEADLETTER_FILE_KEY: &str = "servicebus.deadletter.file";
pub const DEADLETTER_MAX_FILE_SIZE_KEY: &str = "servicebus.deadletter.maxFileSize";
pub const DEADLETTER_MAX_FILES_KEY: &str = "servicebus.deadletter.maxFiles";
pub const GRACEFUL_TIMEOUT_KEY: &str = "servicebus.shutdown.gracefulTimeoutSecs";

/// Environment variables read by [`BusConfig::from_env`], with the property
/// each one sets.
const ENV_KEYS: [(&str, &str); 4] = [
    ("SB_TRANSPORT", TRANSPORT_KEY),
    ("SB_DATA_DIR", BASE_DIR_KEY),
    ("SB_DEADLETTER_FILE", DEADLETTER_FILE_KEY),
    ("SB_GRACEFUL_TIMEOUT_SECS", GRACEFUL_TIMEOUT_KEY),
];

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A property value could not be parsed.
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    /// A setting is out of range or empty.
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Service bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Transport selector, a name in the `TransportRegistry`.
    pub transport: String,
    /// Base storage directory.
    pub base_dir: PathBuf,
    /// Dead-letter sink settings.
    pub dead_letter: DeadLetterConfig,
    /// Deadline for graceful shutdown.
    pub graceful_timeout: Duration,
    /// All properties applied so far, including unrecognized keys.
    pub properties: Properties,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: DEFAULT_TRANSPORT.to_string(),
            base_dir: PathBuf::from("./data"),
            dead_letter: DeadLetterConfig::default(),
            graceful_timeout: Duration::from_secs(30),
            properties: Properties::new(),
        }
    }
}

/// Dead-letter file settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterConfig {
    /// File name under the base directory.
    pub file_name: String,
    /// Size at which the active file is rotated, in bytes.
    pub max_file_size: u64,
    /// Rotated files kept (`<file>.1` .. `<file>.N`).
    pub max_files: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            file_name: "deadLetter.json".to_string(),
            max_file_size: 10 * 1024 * 1024,
            max_files: 3,
        }
    }
}

impl BusConfig {
    /// Defaults overridden by `SB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut properties = Properties::new();
        for (var, key) in ENV_KEYS {
            if let Ok(value) = std::env::var(var) {
                properties.insert(key.to_string(), value);
            }
        }
        let mut config = Self::default();
        config.apply_properties(&properties)?;
        Ok(config)
    }

    /// Merge properties into this configuration.
    ///
    /// Recognized keys update the typed fields; every key is retained in
    /// `properties`. On error nothing is applied.
    pub fn apply_properties(&mut self, properties: &Properties) -> Result<(), ConfigError> {
        let mut next = self.clone();
        for (key, value) in properties {
            match key.as_str() {
                TRANSPORT_KEY => next.transport = value.trim().to_string(),
                BASE_DIR_KEY => next.base_dir = PathBuf::from(value.trim()),
                DEADLETTER_FILE_KEY => next.dead_letter.file_name = value.trim().to_string(),
                DEADLETTER_MAX_FILE_SIZE_KEY => {
                    next.dead_letter.max_file_size = parse(key, value)?;
                }
                DEADLETTER_MAX_FILES_KEY => next.dead_letter.max_files = parse(key, value)?,
                GRACEFUL_TIMEOUT_KEY => {
                    next.graceful_timeout = Duration::from_secs(parse(key, value)?);
                }
                _ => {}
            }
            next.properties.insert(key.clone(), value.clone());
        }
        *self = next;
        Ok(())
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.is_empty() {
            return Err(ConfigError::Invalid {
                key: TRANSPORT_KEY,
                reason: "empty transport name".into(),
            });
        }
        let file_name = &self.dead_letter.file_name;
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                key: DEADLETTER_FILE_KEY,
                reason: format!("{:?} is not a plain file name", file_name),
            });
        }
        if self.dead_letter.max_file_size == 0 {
            return Err(ConfigError::Invalid {
                key: DEADLETTER_MAX_FILE_SIZE_KEY,
                reason: "must be greater than zero".into(),
            });
        }
        if self.graceful_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: GRACEFUL_TIMEOUT_KEY,
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Path of the active dead-letter file.
    #[must_use]
    pub fn dead_letter_path(&self) -> PathBuf {
        self.base_dir.join(&self.dead_letter.file_name)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
