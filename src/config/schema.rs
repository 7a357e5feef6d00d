//! Configuration schema for Hangar
//!
//! Configuration is stored at `~/.config/hangar/config.toml`

use crate::worker::WorkerState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Metadata ledger settings
    pub ledger: LedgerConfig,

    /// Volume store settings
    pub store: StoreConfig,

    /// Artifact HTTP surface
    pub api: ApiConfig,

    /// Garbage collection settings
    pub gc: GcConfig,

    /// Worker placement settings
    pub placement: PlacementConfig,

    /// Worker RPC settings
    pub rpc: RpcConfig,

    /// Statically registered workers
    pub workers: Vec<WorkerConfig>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Ledger persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON snapshot of the ledger, loaded on start and saved after sweeps
    /// (defaults to `<state dir>/ledger.json`)
    pub snapshot_path: Option<PathBuf>,
}

/// Volume store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one content root per worker
    /// (defaults to `<state dir>/volumes`)
    pub content_root: Option<PathBuf>,
}

/// Artifact API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address for the artifact API
    pub listen: String,

    /// Largest accepted artifact upload in bytes
    pub max_artifact_bytes: usize,

    /// Bearer token required on every request; unset disables auth
    pub token: Option<String>,

    /// Teams the token may act for; empty means every team
    pub teams: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            max_artifact_bytes: 512 * 1024 * 1024,
            token: None,
            teams: Vec::new(),
        }
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Seconds between sweep cycles
    pub interval_secs: u64,

    /// Maximum volumes claimed per sweep cycle
    pub batch_size: usize,

    /// Volumes stuck in `creating` longer than this are treated as orphans
    pub creating_grace_secs: u64,

    /// How long a sweeper's claim on a volume row stays exclusive
    pub claim_lease_secs: u64,

    /// Number of cycles an unreachable worker may defer reclamation
    pub retry_budget: u32,
}

impl GcConfig {
    /// Sweep interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Upper bound on the delay between the last owner going away and
    /// the volume being destroyed, assuming the worker comes back
    /// within the retry budget.
    pub fn reclamation_bound(&self) -> Duration {
        self.interval() * self.retry_budget.max(1)
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            batch_size: 100,
            creating_grace_secs: 300,
            claim_lease_secs: 120,
            retry_budget: 10,
        }
    }
}

/// Placement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Keep repeated operations on a resource on the same worker
    pub affinity: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self { affinity: true }
    }
}

/// Worker RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout for a single create/lookup/stream/destroy call
    pub timeout_secs: u64,
}

impl RpcConfig {
    /// RPC timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// A worker registered from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique worker name
    pub name: String,

    /// Placement tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Owning team; absent means globally usable
    #[serde(default)]
    pub team: Option<String>,

    /// Initial liveness state
    #[serde(default = "default_worker_state")]
    pub state: WorkerState,
}

fn default_worker_state() -> WorkerState {
    WorkerState::Running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[gc]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.gc.interval_secs, 30);
        assert!(config.workers.is_empty());
        assert!(config.placement.affinity);
    }

    #[test]
    fn config_deserializes_workers() {
        let toml = r#"
            [gc]
            interval_secs = 10

            [[workers]]
            name = "tagged"
            tags = ["tagged"]

            [[workers]]
            name = "main-worker"
            team = "main"
            state = "stalled"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.gc.interval_secs, 10);
        assert_eq!(config.gc.batch_size, 100); // default preserved
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.workers[0].state, WorkerState::Running);
        assert_eq!(config.workers[1].team.as_deref(), Some("main"));
        assert_eq!(config.workers[1].state, WorkerState::Stalled);
    }

    #[test]
    fn reclamation_bound_is_interval_times_budget() {
        let gc = GcConfig {
            interval_secs: 30,
            retry_budget: 4,
            ..GcConfig::default()
        };
        assert_eq!(gc.reclamation_bound(), Duration::from_secs(120));
    }
}
