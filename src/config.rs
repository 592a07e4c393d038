use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

/// Client configuration persisted between sessions. The bearer token is
/// issued by the external session collaborator; it is stored obfuscated,
/// not encrypted.
#[derive(Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_conflict_check_timeout_ms")]
    pub conflict_check_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    crate::chat::tuning::POLL_INTERVAL_MS
}

fn default_send_timeout_ms() -> u64 {
    crate::chat::tuning::SEND_TIMEOUT_MS
}

fn default_conflict_check_timeout_ms() -> u64 {
    crate::chat::tuning::CONFLICT_CHECK_TIMEOUT_MS
}

impl ClientConfig {
    pub fn new(api_base: &str, token: Option<&str>) -> Self {
        ClientConfig {
            api_base: api_base.to_string(),
            token: token.map(|t| BASE64.encode(t)),
            poll_interval_ms: default_poll_interval_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            conflict_check_timeout_ms: default_conflict_check_timeout_ms(),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().map(|encoded| {
            String::from_utf8(BASE64.decode(encoded).unwrap_or_default()).unwrap_or_default()
        })
    }

    pub fn set_token(&mut self, token: &str) {
        self.token = Some(BASE64.encode(token));
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("tutorlink");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

pub fn save_config(config: &ClientConfig) -> Result<()> {
    let config_path = get_config_path()?;
    let file = File::create(config_path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Configuration saved for {}", config.api_base);
    Ok(())
}

pub fn load_config() -> Result<Option<ClientConfig>> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(None);
    }

    let config_path_str = config_path.display().to_string();

    let mut file = File::open(config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let config: ClientConfig = serde_json::from_str(&contents)?;
    info!("Loaded configuration for {} from {}", config.api_base, config_path_str);

    Ok(Some(config))
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Redirect config reads/writes, used by tests to avoid touching the real
/// config directory. First call wins.
pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}
