use crate::models::AppConfig;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";
const DATA_DIR_ENV: &str = "TRESTLE_DATA_DIR";

pub fn get_data_dir() -> Result<PathBuf, String> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            if !path.exists() {
                fs::create_dir_all(&path)
                    .map_err(|e| format!("failed_to_create_data_dir_override: {}", e))?;
            }
            return Ok(path);
        }
    }

    let home = dirs::home_dir().ok_or("failed_to_get_home_dir")?;
    let data_dir = home.join(".config").join("antigravity-proxy");
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).map_err(|e| format!("failed_to_create_data_dir: {}", e))?;
    }
    Ok(data_dir)
}

pub fn accounts_path() -> Result<PathBuf, String> {
    Ok(get_data_dir()?.join("accounts.json"))
}

pub fn usage_history_path() -> Result<PathBuf, String> {
    Ok(get_data_dir()?.join("usage-history.json"))
}

pub fn load_app_config() -> Result<AppConfig, String> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = AppConfig::new();
        let _ = save_app_config(&config);
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("failed_to_read_config_file: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("failed_to_parse_config_file: {}", e))
}

pub fn save_app_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("failed_to_serialize_config: {}", e))?;
    fs::write(&config_path, content).map_err(|e| format!("failed_to_save_config: {}", e))
}

fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = std::env::var("TRESTLE_THROTTLING") {
        match parse_env_bool(&value) {
            Some(parsed) => {
                config.fetch.request_throttling_enabled = parsed;
                info!("Using request throttling setting from environment: {}", parsed);
            }
            None => warn!(
                "[W-THROTTLING-INVALID] ignoring_invalid_throttling_value: {}",
                value
            ),
        }
    }

    if let Ok(value) = std::env::var("TRESTLE_REQUEST_DELAY_MS") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<u64>() {
                Ok(ms) => {
                    config.fetch.request_delay_ms = ms;
                    info!("Using request delay from environment: {}ms", ms);
                }
                Err(_) => warn!(
                    "[W-REQUEST-DELAY-INVALID] ignoring_invalid_request_delay_value: {}",
                    value
                ),
            }
        }
    }
}

pub fn validate_app_config(config: &AppConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.shaper.min_delay_ms == 0 && config.shaper.jitter_ms == 0 {
        errors.push("shaper: min_delay_ms and jitter_ms cannot both be zero".to_string());
    }
    if config.telemetry.interval_ms <= 0 {
        errors.push("telemetry: interval_ms must be positive".to_string());
    }
    if config.telemetry.active_window_ms <= 0 {
        errors.push("telemetry: active_window_ms must be positive".to_string());
    }
    if config.telemetry.account_gap_ms.0 > config.telemetry.account_gap_ms.1 {
        errors.push("telemetry: account_gap_ms range is inverted".to_string());
    }
    if config.telemetry.endpoint_gap_ms.0 > config.telemetry.endpoint_gap_ms.1 {
        errors.push("telemetry: endpoint_gap_ms range is inverted".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
