use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;
use crate::app::models::Charset;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdbSettings {
    pub command_path: String,
    pub aapt_path: String,
    pub connect_attempts: u32,
    pub command_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub charsets: Vec<Charset>,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            command_path: "adb".to_string(),
            aapt_path: "aapt".to_string(),
            connect_attempts: 3,
            command_timeout_secs: 30,
            install_timeout_secs: 180,
            charsets: Charset::default_order(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    /// `host:port` or USB serial to pin; empty means first available.
    pub preferred_device: String,
    /// Device-side shell commands started detached once a device is selected.
    pub background_services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    pub redis_url: String,
    pub install_key_prefix: String,
    pub analysis_key_prefix: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            install_key_prefix: "android_install_queue".to_string(),
            analysis_key_prefix: "android_analysis_queue".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Ceiling on wall-clock time since the orchestrator started.
    pub max_runtime_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_runtime_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MOBILE_CONTROL_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mobile_control_config.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(config: &AppConfig, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_config_path(path));
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = AppConfig::default();
    if config.adb.command_path.trim().is_empty() {
        config.adb.command_path = defaults.adb.command_path;
    }
    if config.adb.aapt_path.trim().is_empty() {
        config.adb.aapt_path = defaults.adb.aapt_path;
    }
    if !(1..=20).contains(&config.adb.connect_attempts) {
        config.adb.connect_attempts = defaults.adb.connect_attempts;
    }
    if config.adb.command_timeout_secs == 0 {
        config.adb.command_timeout_secs = defaults.adb.command_timeout_secs;
    }
    if config.adb.install_timeout_secs == 0 {
        config.adb.install_timeout_secs = defaults.adb.install_timeout_secs;
    }
    if config.adb.charsets.is_empty() {
        config.adb.charsets = defaults.adb.charsets;
    }
    if config.queue.install_key_prefix.trim().is_empty() {
        config.queue.install_key_prefix = defaults.queue.install_key_prefix;
    }
    if config.queue.analysis_key_prefix.trim().is_empty() {
        config.queue.analysis_key_prefix = defaults.queue.analysis_key_prefix;
    }
    if config.orchestrator.max_runtime_secs == 0 {
        config.orchestrator.max_runtime_secs = defaults.orchestrator.max_runtime_secs;
    }
    config
}
