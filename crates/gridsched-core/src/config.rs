//! gridsched.toml configuration parser.
//!
//! The configuration is loaded once at startup and treated as immutable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,
    #[serde(default)]
    pub vgrids: Option<VgridConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub mig_server_id: String,
    #[serde(default)]
    pub server_fqdn: String,
}

/// Scheduling algorithm selected for the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "FIFO")]
    Fifo,
    #[default]
    BestFit,
    MaxThroughput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub algorithm: Algorithm,
    /// Seconds a job may stay queued. Zero or negative disables expiry.
    pub expire_after: f64,
    /// Seconds after which peer data counts as stale.
    pub expire_peer: f64,
    /// Seconds a cached registry entity survives without updates.
    pub cache_ttl: f64,
    pub reschedule_interval: f64,
    pub multiply_delta: f64,
    pub history_backlog: usize,
    /// Max jobs handed to peers per rebalance round.
    pub migrate_limit: usize,
    /// Publish every known entity instead of only local ones.
    pub forward_gossip: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            expire_after: 86_400.0,
            expire_peer: 600.0,
            cache_ttl: 7.0 * 86_400.0,
            reschedule_interval: 1800.0,
            multiply_delta: 0.001,
            history_backlog: crate::types::HISTORY_BACKLOG,
            migrate_limit: 10,
            forward_gossip: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_migrate_cost")]
    pub migrate_cost: f64,
}

fn default_migrate_cost() -> f64 {
    1.0
}

/// Optional user -> allowed VGrids table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VgridConfig {
    #[serde(default)]
    pub members: BTreeMap<String, Vec<String>>,
}

impl GridConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: GridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config for a standalone server, mostly for tests.
    pub fn standalone(server_id: &str) -> Self {
        GridConfig {
            server: ServerConfig {
                mig_server_id: server_id.to_string(),
                server_fqdn: server_id.to_string(),
            },
            scheduler: SchedulerConfig::default(),
            peers: BTreeMap::new(),
            vgrids: None,
        }
    }

    pub fn with_peer(mut self, peer_id: &str, migrate_cost: f64) -> Self {
        self.peers
            .insert(peer_id.to_string(), PeerConfig { migrate_cost });
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.scheduler.algorithm = algorithm;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.mig_server_id.trim().is_empty() {
            return Err(ConfigError::Invalid("server.mig_server_id is empty".into()));
        }
        if self.scheduler.cache_ttl <= 0.0 {
            return Err(ConfigError::Invalid("scheduler.cache_ttl must be positive".into()));
        }
        if self.scheduler.multiply_delta < 0.0 {
            return Err(ConfigError::Invalid(
                "scheduler.multiply_delta must not be negative".into(),
            ));
        }
        for (peer_id, peer) in &self.peers {
            if peer.migrate_cost < 0.0 || !peer.migrate_cost.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "peers.{peer_id}.migrate_cost must be a non-negative number"
                )));
            }
            if *peer_id == self.server.mig_server_id {
                return Err(ConfigError::Invalid(format!(
                    "peer {peer_id} is the local server"
                )));
            }
        }
        Ok(())
    }

    pub fn server_id(&self) -> &str {
        &self.server.mig_server_id
    }

    /// Link cost to a directly connected peer.
    pub fn peer_cost(&self, peer_id: &str) -> Option<f64> {
        self.peers.get(peer_id).map(|p| p.migrate_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[server]
mig_server_id = "grid-a"
server_fqdn = "grid-a.example.org"

[scheduler]
algorithm = "FIFO"
expire_after = 60
migrate_limit = 3

[peers.grid-b]
migrate_cost = 30.0

[vgrids]
members = { "alice" = ["Generic", "DALTON"] }
"#;
        let config = GridConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server_id(), "grid-a");
        assert_eq!(config.scheduler.algorithm, Algorithm::Fifo);
        assert_eq!(config.scheduler.expire_after, 60.0);
        assert_eq!(config.scheduler.expire_peer, 600.0);
        assert_eq!(config.scheduler.migrate_limit, 3);
        assert_eq!(config.peer_cost("grid-b"), Some(30.0));
        assert_eq!(config.vgrids.unwrap().members["alice"].len(), 2);
    }

    #[test]
    fn test_parse_minimal() {
        let config = GridConfig::from_toml_str("[server]\nmig_server_id = \"solo\"\n").unwrap();
        assert_eq!(config.scheduler.algorithm, Algorithm::BestFit);
        assert_eq!(config.scheduler.cache_ttl, 604_800.0);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_rejects_empty_server_id() {
        let err = GridConfig::from_toml_str("[server]\nmig_server_id = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_negative_peer_cost() {
        let toml_str = "[server]\nmig_server_id = \"a\"\n[peers.b]\nmigrate_cost = -1.0\n";
        assert!(GridConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = GridConfig::from_file(Path::new("/nonexistent/gridsched.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
