//! Metadata ledger
//!
//! The ledger is the single source of truth for workers, volumes,
//! resource caches, cache uses and artifacts. Every trait method is one
//! transaction. Network calls to workers never happen inside one.
//!
//! Garbage collection goes through the `reap_*` and `*_volume_claim`
//! methods. A SQL implementation backs them with
//! `SELECT ... FOR UPDATE SKIP LOCKED`; the in-memory ledger gets the
//! same effect from claim leases on volume rows.

pub mod memory;

pub use memory::MemoryLedger;

use crate::cache::CacheKey;
use crate::error::HangarResult;
use crate::volume::{VolumeOwner, VolumeRecord, VolumeSpec};
use crate::worker::{TeamId, Worker, WorkerState};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Entity that can depend on a resource cache
///
/// Owners are registered and removed by external collaborators (build
/// tracker, pipeline configuration, container lifecycle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    Build(i64),
    Resource(i64),
    Container(String),
}

impl Owner {
    /// A resource only ever depends on its current cache; a newer use
    /// supersedes the previous one.
    pub fn holds_single_use(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(id) => write!(f, "build:{}", id),
            Self::Resource(id) => write!(f, "resource:{}", id),
            Self::Container(handle) => write!(f, "container:{}", handle),
        }
    }
}

/// Ledger row for a resource cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCacheRecord {
    pub id: i64,
    pub key: CacheKey,
    /// Handle of the volume holding the fetched content
    pub volume: String,
    pub created_at: DateTime<Utc>,
}

/// Edge from a resource cache to an owner depending on it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceCacheUse {
    pub cache_id: i64,
    pub owner: Owner,
}

/// Artifact as exposed over the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    pub path: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    pub checksum: String,
}

/// Input for committing an artifact row
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub team: TeamId,
    /// Handle of the initialized and fully streamed volume
    pub volume: String,
    pub path: String,
    pub checksum: String,
}

/// Outcome of committing a freshly fetched cache volume
#[derive(Debug, Clone)]
pub struct CacheCommit {
    pub cache: ResourceCacheRecord,
    /// Volume now backing the cache
    pub volume: VolumeRecord,
    /// False when a concurrent resolve already committed the same key
    /// and the offered volume was left as an orphan
    pub adopted: bool,
}

/// Parameters for claiming orphaned volumes
#[derive(Debug, Clone)]
pub struct VolumeClaim {
    pub sweeper: Uuid,
    pub now: DateTime<Utc>,
    /// How long the claim stays exclusive
    pub lease: Duration,
    /// Volumes still `creating` after this long count as orphans
    pub creating_grace: Duration,
    pub limit: usize,
}

/// Row counts, for status output and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub workers: usize,
    pub volumes: usize,
    pub resource_caches: usize,
    pub resource_cache_uses: usize,
    pub artifacts: usize,
}

/// Durable, transactional metadata store shared by all orchestrators
#[async_trait]
pub trait Ledger: Send + Sync {
    // Workers (written by the registration collaborator)

    /// Insert or replace a worker row
    async fn upsert_worker(&self, worker: Worker) -> HangarResult<()>;

    async fn set_worker_state(&self, name: &str, state: WorkerState) -> HangarResult<()>;

    async fn update_worker_load(&self, name: &str, active_containers: u32) -> HangarResult<()>;

    async fn list_workers(&self) -> HangarResult<Vec<Worker>>;

    /// Remove a worker declared permanently gone. Its volumes are
    /// force-orphaned and returned.
    async fn retire_worker(&self, name: &str) -> HangarResult<Vec<VolumeRecord>>;

    // Owners

    async fn register_owner(&self, owner: Owner) -> HangarResult<()>;

    /// Returns whether the owner existed
    async fn remove_owner(&self, owner: &Owner) -> HangarResult<bool>;

    // Volumes

    /// Insert a `creating` row with no owner
    async fn create_volume(&self, worker: &str, spec: &VolumeSpec) -> HangarResult<VolumeRecord>;

    /// Move a `creating` volume to `created` under `owner`
    async fn mark_volume_created(
        &self,
        handle: &str,
        owner: Option<VolumeOwner>,
    ) -> HangarResult<VolumeRecord>;

    /// Give up on a `creating` volume so the next sweep reclaims it
    async fn abandon_volume(&self, handle: &str) -> HangarResult<()>;

    async fn find_volume(&self, handle: &str) -> HangarResult<Option<VolumeRecord>>;

    async fn list_volumes(&self) -> HangarResult<Vec<VolumeRecord>>;

    // Resource caches

    /// Look up a cache backed by a live volume and record `owner`'s use
    /// of it in the same transaction
    async fn find_and_use_resource_cache(
        &self,
        key: &CacheKey,
        owner: &Owner,
    ) -> HangarResult<Option<(ResourceCacheRecord, VolumeRecord)>>;

    /// Insert the cache row, its volume association and `owner`'s use in
    /// one step. Converges on an existing row for the same key.
    async fn commit_resource_cache(
        &self,
        key: &CacheKey,
        volume: &str,
        owner: &Owner,
    ) -> HangarResult<CacheCommit>;

    /// Delete every use held by `owner`
    async fn release_uses(&self, owner: &Owner) -> HangarResult<usize>;

    async fn list_resource_caches(&self) -> HangarResult<Vec<ResourceCacheRecord>>;

    async fn list_uses(&self) -> HangarResult<Vec<ResourceCacheUse>>;

    // Artifacts

    /// Insert the artifact row and hand the volume to it
    async fn commit_artifact(&self, artifact: NewArtifact) -> HangarResult<ArtifactRecord>;

    /// Live volume backing `team`'s artifact `id`
    async fn find_volume_for_artifact(&self, team: &TeamId, id: i64) -> HangarResult<Option<VolumeRecord>>;

    async fn find_artifact(&self, team: &TeamId, id: i64) -> HangarResult<Option<ArtifactRecord>>;

    async fn delete_artifact(&self, team: &TeamId, id: i64) -> HangarResult<bool>;

    // Garbage collection

    /// Phase 1: delete uses whose owner no longer exists
    async fn reap_dead_uses(&self) -> HangarResult<usize>;

    /// Phase 2: delete caches with no remaining uses
    async fn reap_unused_caches(&self) -> HangarResult<usize>;

    /// Phase 3a: mark up to `limit` orphaned volumes `destroying` and
    /// claim them for `sweeper`. Rows claimed by another sweeper are skipped.
    async fn claim_orphaned_volumes(&self, claim: &VolumeClaim) -> HangarResult<Vec<VolumeRecord>>;

    /// Drop a claim without deleting, so a later cycle retries. Returns
    /// how many destroy attempts on the row have now been released.
    async fn release_volume_claim(&self, handle: &str, sweeper: Uuid) -> HangarResult<u32>;

    /// Phase 3b: remove a destroyed volume's row. `false` when the row was
    /// already gone.
    async fn finish_volume_destroy(&self, handle: &str) -> HangarResult<bool>;

    async fn counts(&self) -> HangarResult<LedgerCounts>;
}
