//! Volume records and the per-worker volume stores
//!
//! A volume is a content root hosted on exactly one worker. The ledger
//! row is the authority on whether a volume should exist; stores only
//! carry out create/stream/destroy commands.
//!
//! # Volume States
//!
//! | State | Owner | Description |
//! |-------|-------|-------------|
//! | creating | none | Being built; invisible to lookups |
//! | created | one or none | Usable; no owner means orphaned |
//! | destroying | claimed | Picked by a sweeper for deletion |

pub mod local;
pub mod pool;
pub mod store;

pub use local::LocalVolumeStore;
pub use pool::WorkerPool;
pub use store::{ByteStream, VolumeStore};

use crate::worker::TeamId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Path used for whole-artifact streaming
pub const ROOT_PATH: &str = "/";

/// Lifecycle state of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Creating,
    Created,
    Destroying,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Destroying => write!(f, "destroying"),
        }
    }
}

/// What a volume is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    ResourceCache,
    Artifact,
    Container,
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceCache => write!(f, "resource"),
            Self::Artifact => write!(f, "artifact"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// The single entity a volume belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VolumeOwner {
    ResourceCache(i64),
    Artifact(i64),
    Container(String),
}

impl fmt::Display for VolumeOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceCache(id) => write!(f, "resource-cache:{}", id),
            Self::Artifact(id) => write!(f, "artifact:{}", id),
            Self::Container(handle) => write!(f, "container:{}", handle),
        }
    }
}

/// Ledger row for a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume handle, unique across workers
    pub handle: String,
    /// Hosting worker
    pub worker: String,
    /// Team the volume was created for
    pub team: Option<TeamId>,
    pub volume_type: VolumeType,
    pub state: VolumeState,
    /// `None` once the owner is gone (orphan)
    pub owner: Option<VolumeOwner>,
    pub created_at: DateTime<Utc>,
    /// Sweeper claim on a destroying row
    #[serde(default)]
    pub claim: Option<Claim>,
    /// Destroy attempts released without success
    #[serde(default)]
    pub failed_destroys: u32,
}

impl VolumeRecord {
    /// Whether the volume may back new work
    pub fn is_live(&self) -> bool {
        self.state == VolumeState::Created
    }
}

/// Exclusive, time-bounded hold a sweeper places on a row it is deleting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub sweeper: Uuid,
    pub until: DateTime<Utc>,
}

impl Claim {
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

/// Parameters for creating a volume on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub handle: String,
    pub volume_type: VolumeType,
    pub team: Option<TeamId>,
}

impl VolumeSpec {
    /// Spec for a fresh, empty volume with a new handle
    pub fn empty(volume_type: VolumeType, team: Option<TeamId>) -> Self {
        Self {
            handle: Uuid::new_v4().to_string(),
            volume_type,
            team,
        }
    }
}

/// A volume as reported by the hosting worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerVolume {
    pub handle: String,
    pub worker: String,
    /// Physical content root on the worker
    pub path: PathBuf,
}
