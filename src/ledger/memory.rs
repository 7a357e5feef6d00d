//! In-process ledger
//!
//! All tables live behind one mutex, so every method is a serializable
//! transaction. The ledger can be snapshotted to a JSON file and loaded
//! back, which is enough durability for a single orchestrator node.

use crate::cache::CacheKey;
use crate::error::{HangarError, HangarResult};
use crate::ledger::{
    ArtifactRecord, CacheCommit, Ledger, LedgerCounts, NewArtifact, Owner, ResourceCacheRecord,
    ResourceCacheUse, VolumeClaim,
};
use crate::volume::{Claim, VolumeOwner, VolumeRecord, VolumeSpec, VolumeState};
use crate::worker::{TeamId, Worker, WorkerState};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactRow {
    team: TeamId,
    volume: String,
    record: ArtifactRecord,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    workers: BTreeMap<String, Worker>,
    owners: BTreeSet<Owner>,
    volumes: BTreeMap<String, VolumeRecord>,
    resource_caches: BTreeMap<i64, ResourceCacheRecord>,
    /// Cache key fingerprint -> cache id (the uniqueness constraint),
    /// rebuilt from `resource_caches` on load
    #[serde(skip)]
    cache_index: BTreeMap<String, i64>,
    uses: BTreeSet<ResourceCacheUse>,
    artifacts: BTreeMap<i64, ArtifactRow>,
    next_cache_id: i64,
    next_artifact_id: i64,
}

impl Tables {
    fn rebuild_cache_index(&mut self) -> HangarResult<()> {
        let mut index = BTreeMap::new();
        for (id, cache) in &self.resource_caches {
            if let Some(other) = index.insert(cache.key.fingerprint()?, *id) {
                let msg = format!("caches {} and {} share key {}", other, id, cache.key);
                error!("{}", msg);
                return Err(HangarError::InvariantViolation(msg));
            }
        }
        self.cache_index = index;
        Ok(())
    }

    /// Cache id indexed under `fingerprint`, checked against the full key
    fn indexed_cache(&self, fingerprint: &str, key: &CacheKey) -> HangarResult<Option<i64>> {
        let Some(&id) = self.cache_index.get(fingerprint) else {
            return Ok(None);
        };
        match self.resource_caches.get(&id) {
            Some(cache) if cache.key == *key => Ok(Some(id)),
            Some(cache) => {
                let msg = format!("cache {} holds key {}, indexed for {}", id, cache.key, key);
                error!("{}", msg);
                Err(HangarError::InvariantViolation(msg))
            }
            None => {
                let msg = format!("cache index points at missing cache {}", id);
                error!("{}", msg);
                Err(HangarError::InvariantViolation(msg))
            }
        }
    }

    fn creating_volume_mut(&mut self, handle: &str) -> HangarResult<&mut VolumeRecord> {
        let volume = self
            .volumes
            .get_mut(handle)
            .ok_or_else(|| HangarError::VolumeNotFound(handle.to_string()))?;
        if volume.state != VolumeState::Creating {
            let msg = format!("volume {} is {}, expected creating", handle, volume.state);
            error!("{}", msg);
            return Err(HangarError::InvariantViolation(msg));
        }
        Ok(volume)
    }

    fn is_live_volume(&self, handle: &str) -> bool {
        self.volumes.get(handle).is_some_and(VolumeRecord::is_live)
    }

    /// Whether a volume's owner reference still points at a live row
    fn owner_resolves(&self, volume: &VolumeRecord) -> bool {
        match &volume.owner {
            None => false,
            Some(VolumeOwner::ResourceCache(id)) => self
                .resource_caches
                .get(id)
                .is_some_and(|c| c.volume == volume.handle),
            Some(VolumeOwner::Artifact(id)) => self
                .artifacts
                .get(id)
                .is_some_and(|a| a.volume == volume.handle),
            Some(VolumeOwner::Container(handle)) => {
                self.owners.contains(&Owner::Container(handle.clone()))
            }
        }
    }

    fn upsert_use(&mut self, cache_id: i64, owner: &Owner) {
        if owner.holds_single_use() {
            self.uses
                .retain(|u| &u.owner != owner || u.cache_id == cache_id);
        }
        self.uses.insert(ResourceCacheUse {
            cache_id,
            owner: owner.clone(),
        });
    }

    fn claimable(&self, volume: &VolumeRecord, claim: &VolumeClaim) -> bool {
        if volume.claim.as_ref().is_some_and(|c| c.is_held(claim.now)) {
            return false;
        }
        match volume.state {
            VolumeState::Destroying => true,
            VolumeState::Creating => volume.created_at + claim.creating_grace <= claim.now,
            VolumeState::Created => !self.owner_resolves(volume),
        }
    }
}

/// Ledger held in process memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
    snapshot: Option<PathBuf>,
}

impl MemoryLedger {
    /// Empty ledger with no snapshot file
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger backed by a snapshot file, loading it if present
    pub async fn open(path: impl Into<PathBuf>) -> HangarResult<Self> {
        let path = path.into();
        let tables = if fs::try_exists(&path)
            .await
            .map_err(|e| HangarError::io(format!("checking snapshot {}", path.display()), e))?
        {
            let content = fs::read_to_string(&path).await.map_err(|e| {
                HangarError::io(format!("reading snapshot {}", path.display()), e)
            })?;
            let mut tables: Tables = serde_json::from_str(&content)?;
            tables.rebuild_cache_index()?;
            info!(
                "Loaded ledger snapshot from {} ({} volumes)",
                path.display(),
                tables.volumes.len()
            );
            tables
        } else {
            debug!("No ledger snapshot at {}, starting empty", path.display());
            Tables::default()
        };

        Ok(Self {
            tables: Mutex::new(tables),
            snapshot: Some(path),
        })
    }

    /// Snapshot file, if any
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Write the snapshot file; a no-op for ledgers without one
    pub async fn save(&self) -> HangarResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let content = {
            let tables = self.tables.lock();
            serde_json::to_string_pretty(&*tables)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HangarError::io("creating snapshot directory", e))?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| HangarError::io(format!("writing snapshot {}", tmp.display()), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| HangarError::io(format!("replacing snapshot {}", path.display()), e))?;

        debug!("Saved ledger snapshot to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn upsert_worker(&self, worker: Worker) -> HangarResult<()> {
        self.tables.lock().workers.insert(worker.name.clone(), worker);
        Ok(())
    }

    async fn set_worker_state(&self, name: &str, state: WorkerState) -> HangarResult<()> {
        let mut t = self.tables.lock();
        let worker = t
            .workers
            .get_mut(name)
            .ok_or_else(|| HangarError::WorkerNotFound(name.to_string()))?;
        worker.state = state;
        Ok(())
    }

    async fn update_worker_load(&self, name: &str, active_containers: u32) -> HangarResult<()> {
        let mut t = self.tables.lock();
        let worker = t
            .workers
            .get_mut(name)
            .ok_or_else(|| HangarError::WorkerNotFound(name.to_string()))?;
        worker.active_containers = active_containers;
        Ok(())
    }

    async fn list_workers(&self) -> HangarResult<Vec<Worker>> {
        Ok(self.tables.lock().workers.values().cloned().collect())
    }

    async fn retire_worker(&self, name: &str) -> HangarResult<Vec<VolumeRecord>> {
        let mut t = self.tables.lock();
        if t.workers.remove(name).is_none() {
            return Err(HangarError::WorkerNotFound(name.to_string()));
        }

        let mut orphaned = Vec::new();
        for volume in t.volumes.values_mut().filter(|v| v.worker == name) {
            volume.owner = None;
            volume.state = VolumeState::Destroying;
            volume.claim = None;
            orphaned.push(volume.clone());
        }
        info!(worker = name, volumes = orphaned.len(), "retired worker");
        Ok(orphaned)
    }

    async fn register_owner(&self, owner: Owner) -> HangarResult<()> {
        self.tables.lock().owners.insert(owner);
        Ok(())
    }

    async fn remove_owner(&self, owner: &Owner) -> HangarResult<bool> {
        Ok(self.tables.lock().owners.remove(owner))
    }

    async fn create_volume(&self, worker: &str, spec: &VolumeSpec) -> HangarResult<VolumeRecord> {
        let mut t = self.tables.lock();
        if !t.workers.contains_key(worker) {
            return Err(HangarError::WorkerNotFound(worker.to_string()));
        }
        if t.volumes.contains_key(&spec.handle) {
            let msg = format!("duplicate volume handle {}", spec.handle);
            error!("{}", msg);
            return Err(HangarError::InvariantViolation(msg));
        }

        let record = VolumeRecord {
            handle: spec.handle.clone(),
            worker: worker.to_string(),
            team: spec.team.clone(),
            volume_type: spec.volume_type,
            state: VolumeState::Creating,
            owner: None,
            created_at: Utc::now(),
            claim: None,
            failed_destroys: 0,
        };
        t.volumes.insert(record.handle.clone(), record.clone());
        Ok(record)
    }

    async fn mark_volume_created(
        &self,
        handle: &str,
        owner: Option<VolumeOwner>,
    ) -> HangarResult<VolumeRecord> {
        let mut t = self.tables.lock();
        let volume = t.creating_volume_mut(handle)?;
        volume.state = VolumeState::Created;
        volume.owner = owner;
        Ok(volume.clone())
    }

    async fn abandon_volume(&self, handle: &str) -> HangarResult<()> {
        let mut t = self.tables.lock();
        if let Some(volume) = t.volumes.get_mut(handle) {
            if volume.state == VolumeState::Creating {
                volume.state = VolumeState::Created;
                volume.owner = None;
                debug!(handle, "abandoned volume");
            }
        }
        Ok(())
    }

    async fn find_volume(&self, handle: &str) -> HangarResult<Option<VolumeRecord>> {
        Ok(self.tables.lock().volumes.get(handle).cloned())
    }

    async fn list_volumes(&self) -> HangarResult<Vec<VolumeRecord>> {
        Ok(self.tables.lock().volumes.values().cloned().collect())
    }

    async fn find_and_use_resource_cache(
        &self,
        key: &CacheKey,
        owner: &Owner,
    ) -> HangarResult<Option<(ResourceCacheRecord, VolumeRecord)>> {
        let fingerprint = key.fingerprint()?;
        let mut t = self.tables.lock();
        let Some(id) = t.indexed_cache(&fingerprint, key)? else {
            return Ok(None);
        };
        let cache = t.resource_caches[&id].clone();

        let Some(volume) = t.volumes.get(&cache.volume).filter(|v| v.is_live()).cloned() else {
            debug!(cache = id, volume = %cache.volume, "cache volume not live, treating as miss");
            return Ok(None);
        };

        t.upsert_use(id, owner);
        Ok(Some((cache, volume)))
    }

    async fn commit_resource_cache(
        &self,
        key: &CacheKey,
        volume: &str,
        owner: &Owner,
    ) -> HangarResult<CacheCommit> {
        let fingerprint = key.fingerprint()?;
        let mut guard = self.tables.lock();
        let t = &mut *guard;
        t.creating_volume_mut(volume)?;

        if let Some(id) = t.indexed_cache(&fingerprint, key)? {
            let existing = t.resource_caches[&id].volume.clone();

            if t.is_live_volume(&existing) {
                // Another resolve committed first; ours becomes an orphan.
                let ours = t.creating_volume_mut(volume)?;
                ours.state = VolumeState::Created;
                ours.owner = None;
                t.upsert_use(id, owner);
                debug!(cache = id, orphaned = volume, "converged on existing cache");
                return Ok(CacheCommit {
                    cache: t.resource_caches[&id].clone(),
                    volume: t.volumes[&existing].clone(),
                    adopted: false,
                });
            }

            // The previous volume is going away; hand the cache to ours.
            if let Some(old) = t.volumes.get_mut(&existing) {
                old.owner = None;
            }
            let ours = t.creating_volume_mut(volume)?;
            ours.state = VolumeState::Created;
            ours.owner = Some(VolumeOwner::ResourceCache(id));
            let cache = t
                .resource_caches
                .get_mut(&id)
                .ok_or_else(|| HangarError::ResourceCacheNotFound(key.to_string()))?;
            cache.volume = volume.to_string();
            let cache = cache.clone();
            t.upsert_use(id, owner);
            debug!(cache = id, volume, replaced = %existing, "re-pointed cache volume");
            return Ok(CacheCommit {
                cache,
                volume: t.volumes[volume].clone(),
                adopted: true,
            });
        }

        let id = t.next_cache_id;
        t.next_cache_id += 1;
        let cache = ResourceCacheRecord {
            id,
            key: key.clone(),
            volume: volume.to_string(),
            created_at: Utc::now(),
        };
        t.resource_caches.insert(id, cache.clone());
        t.cache_index.insert(fingerprint, id);

        let ours = t.creating_volume_mut(volume)?;
        ours.state = VolumeState::Created;
        ours.owner = Some(VolumeOwner::ResourceCache(id));
        let volume = ours.clone();
        t.upsert_use(id, owner);

        debug!(cache = id, key = %key, "inserted resource cache");
        Ok(CacheCommit {
            cache,
            volume,
            adopted: true,
        })
    }

    async fn release_uses(&self, owner: &Owner) -> HangarResult<usize> {
        let mut t = self.tables.lock();
        let before = t.uses.len();
        t.uses.retain(|u| &u.owner != owner);
        Ok(before - t.uses.len())
    }

    async fn list_resource_caches(&self) -> HangarResult<Vec<ResourceCacheRecord>> {
        Ok(self.tables.lock().resource_caches.values().cloned().collect())
    }

    async fn list_uses(&self) -> HangarResult<Vec<ResourceCacheUse>> {
        Ok(self.tables.lock().uses.iter().cloned().collect())
    }

    async fn commit_artifact(&self, artifact: NewArtifact) -> HangarResult<ArtifactRecord> {
        let mut guard = self.tables.lock();
        let t = &mut *guard;
        t.creating_volume_mut(&artifact.volume)?;

        let id = t.next_artifact_id;
        t.next_artifact_id += 1;
        let record = ArtifactRecord {
            id,
            path: artifact.path,
            created_at: Utc::now(),
            checksum: artifact.checksum,
        };

        let volume = t.creating_volume_mut(&artifact.volume)?;
        volume.state = VolumeState::Created;
        volume.owner = Some(VolumeOwner::Artifact(id));

        t.artifacts.insert(
            id,
            ArtifactRow {
                team: artifact.team,
                volume: artifact.volume,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn find_volume_for_artifact(&self, team: &TeamId, id: i64) -> HangarResult<Option<VolumeRecord>> {
        let t = self.tables.lock();
        Ok(t
            .artifacts
            .get(&id)
            .filter(|a| &a.team == team)
            .and_then(|a| t.volumes.get(&a.volume))
            .filter(|v| v.is_live())
            .cloned())
    }

    async fn find_artifact(&self, team: &TeamId, id: i64) -> HangarResult<Option<ArtifactRecord>> {
        let t = self.tables.lock();
        Ok(t
            .artifacts
            .get(&id)
            .filter(|a| &a.team == team)
            .map(|a| a.record.clone()))
    }

    async fn delete_artifact(&self, team: &TeamId, id: i64) -> HangarResult<bool> {
        let mut t = self.tables.lock();
        if t.artifacts.get(&id).is_some_and(|a| &a.team == team) {
            t.artifacts.remove(&id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn reap_dead_uses(&self) -> HangarResult<usize> {
        let mut guard = self.tables.lock();
        let Tables { uses, owners, .. } = &mut *guard;
        let before = uses.len();
        uses.retain(|u| owners.contains(&u.owner));
        Ok(before - uses.len())
    }

    async fn reap_unused_caches(&self) -> HangarResult<usize> {
        let mut guard = self.tables.lock();
        let t = &mut *guard;
        let used: BTreeSet<i64> = t.uses.iter().map(|u| u.cache_id).collect();
        let unused: Vec<i64> = t
            .resource_caches
            .keys()
            .copied()
            .filter(|id| !used.contains(id))
            .collect();

        for id in &unused {
            if let Some(cache) = t.resource_caches.remove(id) {
                debug!(cache = id, key = %cache.key, "reaped unused cache");
            }
        }
        t.cache_index.retain(|_, id| !unused.contains(id));
        Ok(unused.len())
    }

    async fn claim_orphaned_volumes(&self, claim: &VolumeClaim) -> HangarResult<Vec<VolumeRecord>> {
        let mut guard = self.tables.lock();
        let t = &mut *guard;

        let mut eligible: Vec<&VolumeRecord> =
            t.volumes.values().filter(|v| t.claimable(v, claim)).collect();
        eligible.sort_by_key(|v| v.created_at);
        let handles: Vec<String> = eligible
            .into_iter()
            .take(claim.limit)
            .map(|v| v.handle.clone())
            .collect();

        let mut claimed = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(volume) = t.volumes.get_mut(&handle) {
                volume.state = VolumeState::Destroying;
                volume.claim = Some(Claim {
                    sweeper: claim.sweeper,
                    until: claim.now + claim.lease,
                });
                claimed.push(volume.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_volume_claim(&self, handle: &str, sweeper: Uuid) -> HangarResult<u32> {
        let mut t = self.tables.lock();
        let Some(volume) = t.volumes.get_mut(handle) else {
            return Ok(0);
        };
        if volume.claim.as_ref().is_some_and(|c| c.sweeper == sweeper) {
            volume.claim = None;
            volume.failed_destroys += 1;
        }
        Ok(volume.failed_destroys)
    }

    async fn finish_volume_destroy(&self, handle: &str) -> HangarResult<bool> {
        Ok(self.tables.lock().volumes.remove(handle).is_some())
    }

    async fn counts(&self) -> HangarResult<LedgerCounts> {
        let t = self.tables.lock();
        Ok(LedgerCounts {
            workers: t.workers.len(),
            volumes: t.volumes.len(),
            resource_caches: t.resource_caches.len(),
            resource_cache_uses: t.uses.len(),
            artifacts: t.artifacts.len(),
        })
    }
}
