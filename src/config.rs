//! # Settings
//!
//! Everything the gateway needs to know at startup: where the device daemon listens,
//! which broker to publish to, and which buttons occupy which of the eight slots.
//!
//! Settings come from a TOML file, loaded once through a [`SettingsProvider`]. A
//! changed file only takes effect after a restart.
//!
//! ```toml
//! epoch_secs = 3600
//!
//! [daemon]
//! host = "localhost"
//! port = 5551
//!
//! [mqtt]
//! url = "tcp://broker.local:1883"
//! topic_prefix = "flic"
//!
//! [[buttons]]
//! slot = 0
//! name = "kitchen"
//! address = "80:e4:da:7a:0b:1c"
//!
//! [filter]
//! click_or_hold = ["Hold"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::daemon::event_collector::ButtonEventFilter;
use crate::protocol::{BdAddr, DEFAULT_DAEMON_PORT};

/// Number of button slots the gateway manages.
pub const MAX_SLOTS: usize = 8;
pub const DEFAULT_CLIENT_ID: &str = "Flic2MQTT/1.0";
pub const DEFAULT_EPOCH_SECS: u64 = 3600;
/// One year; longer epochs would overflow the deadline arithmetic.
pub const MAX_EPOCH_SECS: u64 = 366 * 24 * 3600;

const CONFIG_DIR: &str = "flic2mqtt";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No configuration directory available on this system")]
    NoConfigDir,

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Source of the gateway settings
pub trait SettingsProvider {
    fn load(&self) -> Result<Settings, ConfigError>;
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DaemonSettings {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker address, `tcp://host:port`
    pub url: String,
    pub topic_prefix: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

/// One configured button position
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ButtonSlot {
    pub slot: u8,
    /// Used as the topic segment for this button
    pub name: String,
    /// Without an address the slot is published to but never connected
    #[serde(default)]
    pub address: Option<BdAddr>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub daemon: DaemonSettings,
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub buttons: Vec<ButtonSlot>,
    #[serde(default)]
    pub filter: ButtonEventFilter,
    #[serde(default = "default_epoch_secs")]
    pub epoch_secs: u64,
}

fn default_daemon_host() -> String {
    "localhost".to_string()
}

fn default_daemon_port() -> u16 {
    DEFAULT_DAEMON_PORT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_epoch_secs() -> u64 {
    DEFAULT_EPOCH_SECS
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buttons.len() > MAX_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "{} buttons configured, at most {} slots exist",
                self.buttons.len(),
                MAX_SLOTS
            )));
        }

        let mut slots = HashSet::new();
        let mut names = HashSet::new();
        for button in &self.buttons {
            if usize::from(button.slot) >= MAX_SLOTS {
                return Err(ConfigError::Invalid(format!(
                    "slot {} out of range 0..{}",
                    button.slot, MAX_SLOTS
                )));
            }
            if !slots.insert(button.slot) {
                return Err(ConfigError::Invalid(format!("slot {} configured twice", button.slot)));
            }
            if !is_topic_segment(&button.name) {
                return Err(ConfigError::Invalid(format!(
                    "button name '{}' is not usable as a topic segment",
                    button.name
                )));
            }
            if !names.insert(button.name.as_str()) {
                return Err(ConfigError::Invalid(format!("button name '{}' used twice", button.name)));
            }
        }

        if !is_topic_prefix(&self.mqtt.topic_prefix) {
            return Err(ConfigError::Invalid(format!(
                "mqtt topic_prefix '{}' is empty or contains wildcards",
                self.mqtt.topic_prefix
            )));
        }
        if self.mqtt.url.is_empty() {
            return Err(ConfigError::Invalid("empty mqtt url".to_string()));
        }
        if self.mqtt.client_id.is_empty() || self.mqtt.client_id.starts_with(' ') {
            return Err(ConfigError::Invalid(format!(
                "mqtt client_id '{}' is not usable",
                self.mqtt.client_id
            )));
        }
        if self.epoch_secs == 0 || self.epoch_secs > MAX_EPOCH_SECS {
            return Err(ConfigError::Invalid(format!(
                "epoch_secs {} out of range 1..={}",
                self.epoch_secs, MAX_EPOCH_SECS
            )));
        }
        Ok(())
    }

    pub fn epoch_length(&self) -> Duration {
        Duration::from_secs(self.epoch_secs)
    }

    /// Slot table indexed by slot number
    pub fn slot_table(&self) -> [Option<ButtonSlot>; MAX_SLOTS] {
        let mut table: [Option<ButtonSlot>; MAX_SLOTS] = Default::default();
        for button in &self.buttons {
            if let Some(entry) = table.get_mut(usize::from(button.slot)) {
                *entry = Some(button.clone());
            }
        }
        table
    }
}

fn is_topic_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '+', '#'])
}

// Prefix may span several levels, but no level may be empty or a wildcard
fn is_topic_prefix(prefix: &str) -> bool {
    prefix.split('/').all(is_topic_segment)
}

/// Settings backed by a TOML file on disk
#[derive(Debug, Clone)]
pub struct TomlSettingsFile {
    path: PathBuf,
}

impl TomlSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/flic2mqtt/config.toml`
    pub fn default_location() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(dir.join(CONFIG_DIR).join(CONFIG_FILE)))
    }
}

impl SettingsProvider for TomlSettingsFile {
    fn load(&self) -> Result<Settings, ConfigError> {
        info!("Loading settings from {}", self.path.display());
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let settings = Settings::from_toml_str(&content)?;
        debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }
}
