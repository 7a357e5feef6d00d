//! Worker records and placement
//!
//! Workers are written by an external registration/heartbeat
//! collaborator; this module only reads them to decide placement.
//!
//! | State | Eligible | Description |
//! |-------|----------|-------------|
//! | running | yes | Heartbeating normally |
//! | stalled | no | Missed heartbeats, may come back |
//! | retiring | no | Draining before removal |

pub mod affinity;
pub mod selector;

pub use affinity::{AffinityKey, AffinityStore};
pub use selector::{PlacementRequest, WorkerSelector};

use crate::config::schema::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Team identity as supplied by the external access-control layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(String);

impl TeamId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Liveness state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Running,
    Stalled,
    Retiring,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stalled => write!(f, "stalled"),
            Self::Retiring => write!(f, "retiring"),
        }
    }
}

/// A worker node able to host volumes and containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique worker name, also the stable tie-break key
    pub name: String,
    /// Placement tags
    pub tags: BTreeSet<String>,
    /// Owning team; `None` means globally usable
    pub team: Option<TeamId>,
    /// Current liveness state
    pub state: WorkerState,
    /// Containers currently running on the worker
    pub active_containers: u32,
}

impl Worker {
    /// Create a running, untagged, global worker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            team: None,
            state: WorkerState::Running,
            active_containers: 0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_team(mut self, team: TeamId) -> Self {
        self.team = Some(team);
        self
    }

    pub fn with_state(mut self, state: WorkerState) -> Self {
        self.state = state;
        self
    }

    pub fn with_active_containers(mut self, count: u32) -> Self {
        self.active_containers = count;
        self
    }

    /// Whether the worker carries every required tag
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }

    /// Whether `team` may place work here (owned by that team, or global)
    pub fn usable_by(&self, team: Option<&TeamId>) -> bool {
        match &self.team {
            None => true,
            Some(owner) => Some(owner) == team,
        }
    }
}

impl From<&WorkerConfig> for Worker {
    fn from(config: &WorkerConfig) -> Self {
        let mut worker = Worker::new(config.name.clone())
            .with_tags(config.tags.iter().cloned())
            .with_state(config.state);
        if let Some(team) = &config.team {
            worker = worker.with_team(TeamId::new(team.clone()));
        }
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn untagged_requirement_matches_any_worker() {
        let worker = Worker::new("w1").with_tags(["gpu"]);
        assert!(worker.satisfies(&tags(&[])));
        assert!(worker.satisfies(&tags(&["gpu"])));
        assert!(!worker.satisfies(&tags(&["gpu", "arm"])));
    }

    #[test]
    fn team_workers_are_private() {
        let main = TeamId::new("main");
        let other = TeamId::new("other");
        let worker = Worker::new("w1").with_team(main.clone());

        assert!(worker.usable_by(Some(&main)));
        assert!(!worker.usable_by(Some(&other)));
        assert!(!worker.usable_by(None));
        assert!(Worker::new("global").usable_by(Some(&other)));
    }

    #[test]
    fn worker_from_config() {
        let config = WorkerConfig {
            name: "team-worker".to_string(),
            tags: vec!["tagged".to_string()],
            team: Some("main".to_string()),
            state: WorkerState::Retiring,
        };
        let worker = Worker::from(&config);
        assert_eq!(worker.team, Some(TeamId::new("main")));
        assert_eq!(worker.state, WorkerState::Retiring);
        assert!(worker.tags.contains("tagged"));
    }

    #[test]
    fn worker_state_serializes_lowercase() {
        let json = serde_json::to_string(&WorkerState::Stalled).unwrap();
        assert_eq!(json, "\"stalled\"");
        assert_eq!(WorkerState::Retiring.to_string(), "retiring");
    }
}
