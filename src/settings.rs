use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_storage_directory")]
    pub storage: PathBuf,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_send_destination")]
    pub send_destination: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("CARWASH").separator("__"));

        let config = builder
            .build()
            .map_err(map_config_error)
            .context("failed to build configuration")?;

        config
            .try_deserialize::<Settings>()
            .map_err(map_config_error)
            .context("failed to deserialize configuration")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn selection_file(&self) -> PathBuf {
        self.storage.join("checkout-selection.json")
    }
}

fn map_config_error(err: ConfigError) -> anyhow::Error {
    match err {
        ConfigError::NotFound(_) => err.into(),
        _ => anyhow::anyhow!(err),
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("./var")
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_topic_prefix() -> String {
    "/topic/chat/".to_string()
}

fn default_send_destination() -> String {
    "/app/chat.sendMessage".to_string()
}
