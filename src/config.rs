//! WolfElect Configuration
//!
//! This module provides configuration structures for the WolfElect
//! election orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main WolfElect configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfElectConfig {
    /// Coordination service connection configuration
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Election run configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// Session monitoring configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordination service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Comma-separated list of host:port endpoints
    #[serde(default = "default_servers")]
    pub servers: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

/// Election run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Path all candidates register under
    #[serde(default = "default_election_path")]
    pub path: String,

    /// Number of competing candidates to start
    #[serde(default = "default_candidates")]
    pub candidates: u32,

    /// Prefix for candidate sequence nodes
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Descriptive metadata stored with each registration
    #[serde(default = "default_metadata")]
    pub metadata: String,

    /// How long a candidate waits to become leader before giving up
    #[serde(default = "default_leader_wait_timeout_secs")]
    pub leader_wait_timeout_secs: u64,

    /// Base unit of simulated leader work in milliseconds
    #[serde(default = "default_work_unit_ms")]
    pub work_unit_ms: u64,

    /// Delay between connecting and starting candidates
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Session monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Consecutive disconnects tolerated before the run is aborted
    #[serde(default = "default_max_disconnect_retries")]
    pub max_disconnect_retries: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_servers() -> String {
    "127.0.0.1:2181".to_string()
}

fn default_session_timeout_ms() -> u64 {
    5000
}

fn default_election_path() -> String {
    "/election".to_string()
}

fn default_candidates() -> u32 {
    3
}

fn default_id_prefix() -> String {
    "n_".to_string()
}

fn default_metadata() -> String {
    "president".to_string()
}

fn default_leader_wait_timeout_secs() -> u64 {
    100
}

fn default_work_unit_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_max_disconnect_retries() -> u32 {
    crate::session::DEFAULT_MAX_DISCONNECT_RETRIES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            path: default_election_path(),
            candidates: default_candidates(),
            id_prefix: default_id_prefix(),
            metadata: default_metadata(),
            leader_wait_timeout_secs: default_leader_wait_timeout_secs(),
            work_unit_ms: default_work_unit_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_disconnect_retries: default_max_disconnect_retries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CoordinationConfig {
    /// Split the endpoint string into individual host:port entries
    pub fn server_list(&self) -> Vec<String> {
        self.servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Get session timeout as Duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Validate the endpoint list
    pub fn validate(&self) -> crate::Result<()> {
        let servers = self.server_list();
        if servers.is_empty() {
            return Err(crate::Error::Config(
                "coordination.servers cannot be empty".into(),
            ));
        }

        for server in &servers {
            let valid = match server.rsplit_once(':') {
                Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
                None => false,
            };
            if !valid {
                return Err(crate::Error::Config(format!(
                    "coordination.servers entry '{}' is not host:port",
                    server
                )));
            }
        }

        Ok(())
    }
}

impl ElectionConfig {
    /// Get leader wait timeout as Duration
    pub fn leader_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.leader_wait_timeout_secs)
    }

    /// Get work unit as Duration
    pub fn work_unit(&self) -> Duration {
        Duration::from_millis(self.work_unit_ms)
    }

    /// Get settle delay as Duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.coordination.validate()?;

        let path = &self.election.path;
        if path == "/" || crate::coord::validate_path(path).is_err() {
            return Err(crate::Error::Config(format!(
                "election.path '{}' must be an absolute, non-root path without a trailing slash",
                path
            )));
        }

        if self.election.candidates == 0 {
            return Err(crate::Error::Config(
                "election.candidates must be at least 1".into(),
            ));
        }

        if self.election.id_prefix.contains('/') {
            return Err(crate::Error::Config(
                "election.id_prefix cannot contain '/'".into(),
            ));
        }

        Ok(())
    }
}
