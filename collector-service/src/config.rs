use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;
use consumption_core::Fluid;
use serde::Deserialize;

const DEFAULT_PORTAL_BASE_URL: &str = "https://espace-resident-api.ocea-sb.com/api/v1";

/// How often the portal is polled. The portal refreshes once a day, so
/// only coarse intervals are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum UpdateInterval {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "3h")]
    ThreeHours,
    #[default]
    #[serde(rename = "6h")]
    SixHours,
}

impl UpdateInterval {
    pub fn as_duration(self) -> Duration {
        let hours = match self {
            UpdateInterval::OneHour => 1,
            UpdateInterval::ThreeHours => 3,
            UpdateInterval::SixHours => 6,
        };
        Duration::from_secs(hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_base_url")]
    pub base_url: String,
    /// Bearer token obtained out of band.
    pub access_token: String,
    /// Dwelling id; looked up from the resident profile when absent.
    pub local_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub update_interval: UpdateInterval,
    /// Upper bound of the random shift applied once to the poll interval.
    pub update_jitter_secs: u64,
    pub fluids: Vec<Fluid>,
    pub state_path: Option<PathBuf>,
    /// Offset used to compute "today". Falls back to the host's local offset.
    pub utc_offset_hours: Option<i8>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            update_interval: UpdateInterval::default(),
            update_jitter_secs: 300,
            fluids: Fluid::ALL.to_vec(),
            state_path: None,
            utc_offset_hours: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDbConfig {
    pub ilp_tcp_addr: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub portal: PortalConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub questdb: Option<QuestDbConfig>,
    pub metrics: Option<MetricsConfig>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("collector.fluids must list at least one fluid")]
    NoFluids,
    #[error("fluid '{0}' is listed more than once")]
    DuplicateFluid(Fluid),
    #[error("portal.access_token must not be empty")]
    EmptyToken,
    #[error("collector.utc_offset_hours {0} is out of range")]
    InvalidOffset(i8),
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("OCEA_COLLECTOR_CONFIG")
            .unwrap_or_else(|_| "collector-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("invalid config file {path}"))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portal.access_token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }

        let fluids = &self.collector.fluids;
        if fluids.is_empty() {
            return Err(ConfigError::NoFluids);
        }
        for (i, fluid) in fluids.iter().enumerate() {
            if fluids[..i].contains(fluid) {
                return Err(ConfigError::DuplicateFluid(*fluid));
            }
        }

        if let Some(hours) = self.collector.utc_offset_hours {
            if !(-23..=23).contains(&hours) {
                return Err(ConfigError::InvalidOffset(hours));
            }
        }

        Ok(())
    }
}

fn default_portal_base_url() -> String {
    DEFAULT_PORTAL_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [portal]
            access_token = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.portal.base_url, DEFAULT_PORTAL_BASE_URL);
        assert_eq!(cfg.portal.timeout_secs, 30);
        assert_eq!(cfg.collector.update_interval, UpdateInterval::SixHours);
        assert_eq!(cfg.collector.update_jitter_secs, 300);
        assert_eq!(cfg.collector.fluids, Fluid::ALL.to_vec());
        assert_eq!(cfg.api.bind_addr, "0.0.0.0:8080");
        assert!(cfg.questdb.is_none());
        assert!(cfg.metrics.is_none());
    }

    #[test]
    fn full_config_parses() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [portal]
            base_url = "http://localhost:9000/api/v1"
            access_token = "secret"
            local_id = "42"

            [collector]
            update_interval = "1h"
            update_jitter_secs = 0
            fluids = ["cold_water", "heat"]
            state_path = "/var/lib/ocea/state.json"
            utc_offset_hours = 1

            [api]
            bind_addr = "127.0.0.1:8099"

            [questdb]
            ilp_tcp_addr = "127.0.0.1:9009"

            [metrics]
            bind_addr = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.portal.local_id.as_deref(), Some("42"));
        assert_eq!(cfg.collector.update_interval.as_duration(), Duration::from_secs(3600));
        assert_eq!(cfg.collector.update_jitter_secs, 0);
        assert_eq!(cfg.collector.fluids, vec![Fluid::ColdWater, Fluid::Heat]);
        assert_eq!(cfg.collector.utc_offset_hours, Some(1));
        let questdb = cfg.questdb.unwrap();
        assert_eq!(questdb.max_retries, 3);
        assert_eq!(questdb.retry_backoff_ms, 500);
    }

    #[test]
    fn unsupported_interval_is_rejected() {
        let res = AppConfig::from_toml_str(
            r#"
            [portal]
            access_token = "secret"
            [collector]
            update_interval = "2h"
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn validation_catches_bad_fluid_lists_and_tokens() {
        let mut cfg = AppConfig::from_toml_str("[portal]\naccess_token = \"t\"").unwrap();

        cfg.collector.fluids = vec![];
        assert_eq!(cfg.validate(), Err(ConfigError::NoFluids));

        cfg.collector.fluids = vec![Fluid::Heat, Fluid::ColdWater, Fluid::Heat];
        assert_eq!(cfg.validate(), Err(ConfigError::DuplicateFluid(Fluid::Heat)));

        cfg.collector.fluids = vec![Fluid::Heat];
        cfg.portal.access_token = "  ".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyToken));
    }
}
