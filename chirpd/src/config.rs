use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use adapter_mqtt::MqttSettings;
use anyhow::{Context, Result};
use chirp_discovery::{BridgeSettings, LogLevel};
use dotenv::dotenv;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "/data/options.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported mqtt url scheme: {0}")]
    Scheme(String),
    #[error("mqtt url missing host")]
    MissingHost,
    #[error("invalid mqtt url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Daemon options, read from the add-on options file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub application_id: Option<String>,
    pub chirpstack_api_server: String,
    pub server_port: u16,
    pub api_connection_key: String,
    pub mqtt_server: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: Option<String>,
    pub discovery_prefix: String,
    /// Seconds.
    pub options_start_delay: f64,
    /// Seconds.
    pub options_restore_age: f64,
    pub options_log_level: String,
    /// Minutes, 0 disables per-device availability.
    pub options_online_per_device: f64,
    pub options_add_expire_after: bool,
    pub classes_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            application_id: None,
            chirpstack_api_server: "localhost".to_string(),
            server_port: 8080,
            api_connection_key: String::new(),
            mqtt_server: "core-mosquitto".to_string(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_password: None,
            mqtt_client_id: None,
            discovery_prefix: "homeassistant".to_string(),
            options_start_delay: 2.0,
            options_restore_age: 4.0,
            options_log_level: "info".to_string(),
            options_online_per_device: 0.0,
            options_add_expire_after: false,
            classes_file: None,
        }
    }
}

impl Config {
    /// Reads `path`, then applies `CHIRPD_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        dotenv().ok();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut c = Self::from_json(&text)?;
        c.apply_overrides(|key| std::env::var(key).ok())?;
        c.validate()?;
        Ok(c)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parse config file")
    }

    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(conn) = var("CHIRPD_MQTT_URL") {
            let mqtt = MqttConfig::from_connection_string(&conn)?;
            self.mqtt_server = mqtt.host;
            self.mqtt_port = mqtt.port;
            if mqtt.username.is_some() {
                self.mqtt_user = mqtt.username;
                self.mqtt_password = mqtt.password;
            }
            if mqtt.client_id.is_some() {
                self.mqtt_client_id = mqtt.client_id;
            }
        }
        if let Some(s) = var("CHIRPD_MQTT_USER") {
            self.mqtt_user = Some(s);
        }
        if let Some(s) = var("CHIRPD_MQTT_PASSWORD") {
            self.mqtt_password = Some(s);
        }
        if let Some(s) = var("CHIRPD_API_KEY") {
            self.api_connection_key = s;
        }
        if let Some(s) = var("CHIRPD_API_SERVER") {
            self.chirpstack_api_server = s;
        }
        if let Some(s) = var("CHIRPD_API_PORT") {
            self.server_port = s
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "CHIRPD_API_PORT", value: s.clone() })?;
        }
        Ok(())
    }

    /// Replaces the configured level, e.g. from the command line.
    pub fn with_log_level(mut self, level: Option<&str>) -> Result<Self> {
        if let Some(level) = level {
            self.options_log_level = level.to_string();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level()?;
        seconds("options_start_delay", self.options_start_delay)?;
        seconds("options_restore_age", self.options_restore_age)?;
        seconds("options_online_per_device", self.options_online_per_device * 60.0)?;
        if self.discovery_prefix.is_empty() {
            return Err(ConfigError::Invalid { key: "discovery_prefix", value: String::new() });
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.options_log_level.parse().map_err(|_| ConfigError::Invalid {
            key: "options_log_level",
            value: self.options_log_level.clone(),
        })
    }

    /// Stable id of this bridge instance, derived from the options that
    /// identify it on the broker.
    ///
    /// This is a UUIDv5 in simple form, not the md5 digest older
    /// chirp2mqtt add-ons used, so a migrated installation gets new bridge
    /// entity ids in Home Assistant. Changing the derivation again
    /// renames them once more.
    pub fn bridge_unique_id(&self) -> String {
        let seed = format!(
            "{}{}{}{}",
            self.application_id.as_deref().unwrap_or_default(),
            self.mqtt_server,
            self.mqtt_port,
            self.discovery_prefix
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).simple().to_string()
    }

    pub fn api_endpoint(&self) -> String {
        format!("http://{}:{}", self.chirpstack_api_server, self.server_port)
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_server.clone(),
            port: self.mqtt_port,
            client_id: self
                .mqtt_client_id
                .clone()
                .unwrap_or_else(|| format!("chirpd_{}", self.bridge_unique_id())),
            username: self.mqtt_user.clone().filter(|u| !u.is_empty()),
            password: self.mqtt_password.clone(),
        }
    }

    /// Engine settings for the resolved `application_id`.
    pub fn bridge_settings(&self, application_id: &str) -> Result<BridgeSettings, ConfigError> {
        let mut settings =
            BridgeSettings::new(application_id, &self.discovery_prefix, &self.bridge_unique_id());
        settings.start_delay = seconds("options_start_delay", self.options_start_delay)?;
        settings.restore_age = seconds("options_restore_age", self.options_restore_age)?;
        settings.log_level = self.log_level()?;
        settings.expire_after = self.options_add_expire_after;
        let per_device = seconds("options_online_per_device", self.options_online_per_device * 60.0)?;
        settings.live_check_interval = (!per_device.is_zero()).then_some(per_device);
        Ok(settings)
    }
}

fn seconds(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::Invalid { key, value: value.to_string() })
}

#[derive(Clone, Debug, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MqttConfig {
    /// Parses `mqtt://[user[:password]@]host[:port][?client_id=id]`.
    pub fn from_connection_string(conn: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(conn)?;
        if url.scheme() != "mqtt" {
            return Err(ConfigError::Scheme(url.scheme().to_string()));
        }

        let host = url.host_str().ok_or(ConfigError::MissingHost)?.to_string();
        let port = url.port().unwrap_or(1883);
        let client_id =
            url.query_pairs().find(|(k, _)| k == "client_id").map(|(_, v)| v.into_owned());
        let username = (!url.username().is_empty()).then(|| url.username().to_string());
        let password = url.password().map(str::to_string);

        Ok(Self { host, port, client_id, username, password })
    }
}
