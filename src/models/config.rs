use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub shaper: ShaperConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            fetch: FetchConfig::default(),
            shaper: ShaperConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub request_throttling_enabled: bool,
    pub request_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_throttling_enabled: true,
            request_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaperConfig {
    pub min_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 3000,
            jitter_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub base_url: String,
    pub interval_ms: i64,
    pub jitter_ms: i64,
    /// Floor applied to the per-iteration sleep.
    pub min_sleep_ms: i64,
    pub startup_delay_ms: u64,
    /// Window after the last proxy activity during which heartbeats run,
    /// and after the last per-account use during which an account counts
    /// as active.
    pub active_window_ms: i64,
    pub account_gap_ms: (u64, u64),
    pub endpoint_gap_ms: (u64, u64),
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: crate::constants::DAILY_BASE_URL.to_string(),
            interval_ms: 45_000,
            jitter_ms: 15_000,
            min_sleep_ms: 5_000,
            startup_delay_ms: 5_000,
            active_window_ms: 600_000,
            account_gap_ms: (2_000, 5_000),
            endpoint_gap_ms: (500, 2_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipping_values() {
        let config = AppConfig::default();
        assert!(config.fetch.request_throttling_enabled);
        assert_eq!(config.fetch.request_delay_ms, 200);
        assert_eq!(config.shaper.min_delay_ms, 3000);
        assert_eq!(config.shaper.jitter_ms, 2000);
        assert_eq!(config.telemetry.interval_ms, 45_000);
        assert_eq!(config.telemetry.active_window_ms, 600_000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"fetch":{"request_throttling_enabled":false,"request_delay_ms":50}}"#)
                .expect("parse partial config");
        assert!(!config.fetch.request_throttling_enabled);
        assert_eq!(config.fetch.request_delay_ms, 50);
        assert_eq!(config.shaper.min_delay_ms, 3000);
    }
}
