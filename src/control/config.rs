//! Configuration loading for the vehicle link.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::link::session::{DEFAULT_HOST, DEFAULT_PORT, PeerAddress};
use crate::link::LinkError;
use crate::runtime::PollSchedule;

/// Config file looked up by the console when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "airboat.toml";

/// Link settings. Every key is optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LinkConfig {
    /// Vehicle address
    pub host: String,
    /// Vehicle UDP port
    pub port: u16,
    /// How long a telemetry request waits for its reply
    pub receive_timeout_ms: u64,
    pub poll_interval_secs: u64,
    pub poll_initial_delay_secs: u64,
    /// Background workers for sends and telemetry requests
    pub workers: usize,
    /// Bounded wait for in-flight work on shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            receive_timeout_ms: 5000,
            poll_interval_secs: 2,
            poll_initial_delay_secs: 5,
            workers: 2,
            shutdown_grace_ms: 2000,
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        PeerAddress::new(&self.host, self.port)?;
        if self.receive_timeout_ms == 0 {
            return Err(LinkError::Configuration("receive-timeout-ms must be positive".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(LinkError::Configuration("poll-interval-secs must be positive".into()));
        }
        if self.workers == 0 {
            return Err(LinkError::Configuration("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_secs(self.poll_interval_secs),
            initial_delay: Duration::from_secs(self.poll_initial_delay_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = LinkConfig::from_toml_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.host, "192.168.4.1");
        assert_eq!(config.port, 12345);
        assert_eq!(config.receive_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.poll_schedule(),
            PollSchedule { interval: Duration::from_secs(2), initial_delay: Duration::from_secs(5) }
        );
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = LinkConfig::from_toml_str(
            r#"
            host = "10.1.1.7"
            port = 4210
            receive-timeout-ms = 750
            poll-interval-secs = 1
            poll-initial-delay-secs = 0
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "10.1.1.7");
        assert_eq!(config.port, 4210);
        assert_eq!(config.receive_timeout(), Duration::from_millis(750));
        assert_eq!(config.poll_schedule().initial_delay, Duration::ZERO);
        assert_eq!(config.workers, 4);
        assert_eq!(config.shutdown_grace_ms, 2000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(LinkConfig::from_toml_str("port = 0").is_err());
        assert!(LinkConfig::from_toml_str("host = \"\"").is_err());
        assert!(LinkConfig::from_toml_str("workers = 0").is_err());
        assert!(LinkConfig::from_toml_str("receive-timeout-ms = 0").is_err());
        assert!(LinkConfig::from_toml_str("poll-interval-secs = 0").is_err());
        assert!(LinkConfig::from_toml_str("port = 70000").is_err());
        assert!(LinkConfig::from_toml_str("port = \"abc\"").is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = LinkConfig::load(Path::new("/nonexistent/airboat.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/airboat.toml"));
    }
}
