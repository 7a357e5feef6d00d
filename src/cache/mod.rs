//! Resource cache engine
//!
//! Resolves a (resource type, version, config digest) tuple to a volume
//! holding the fetched content, recording the caller's use of it.
//!
//! # Resolution
//!
//! | Ledger state | Result |
//! |--------------|--------|
//! | Cache with live volume | Reuse, refresh the use edge |
//! | Cache with missing/destroying volume | Miss, fetch and re-point |
//! | No cache | Miss, fetch and insert |
//!
//! A miss creates the volume, runs the fetch, then commits. Failure before
//! the commit leaves an orphan volume for the sweeper and no ledger row.

pub mod key;

pub use key::{config_digest, CacheKey, ResourceVersion};

use crate::error::{HangarError, HangarResult};
use crate::ledger::{Ledger, Owner, ResourceCacheRecord};
use crate::volume::{VolumeRecord, VolumeSpec, VolumeType, WorkerPool, WorkerVolume};
use crate::worker::{PlacementRequest, Worker, WorkerSelector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs the actual check/fetch into a freshly created volume
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn fetch(&self, worker: &Worker, volume: &WorkerVolume, key: &CacheKey) -> HangarResult<()>;
}

/// Outcome of a resolve
#[derive(Debug, Clone)]
pub struct Resolution {
    pub cache: ResourceCacheRecord,
    pub volume: VolumeRecord,
    /// True when this call fetched the content backing the cache
    pub created: bool,
}

/// Looks up or creates resource caches and tracks who uses them
pub struct ResourceCacheEngine {
    ledger: Arc<dyn Ledger>,
    pool: Arc<WorkerPool>,
    selector: WorkerSelector,
    executor: Arc<dyn FetchExecutor>,
}

impl ResourceCacheEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        pool: Arc<WorkerPool>,
        selector: WorkerSelector,
        executor: Arc<dyn FetchExecutor>,
    ) -> Self {
        Self {
            ledger,
            pool,
            selector,
            executor,
        }
    }

    /// Resolve `key` for `owner`, fetching on a worker chosen for `placement`
    /// when no live cache exists
    pub async fn resolve(
        &self,
        key: &CacheKey,
        owner: &Owner,
        placement: &PlacementRequest,
    ) -> HangarResult<Resolution> {
        if let Some((cache, volume)) = self.ledger.find_and_use_resource_cache(key, owner).await? {
            debug!(cache = cache.id, key = %key, owner = %owner, "cache hit");
            return Ok(Resolution {
                cache,
                volume,
                created: false,
            });
        }

        let workers = self.ledger.list_workers().await?;
        let ranked = self.selector.rank(&workers, placement)?;

        let mut last_err = None;
        for worker in ranked {
            match self.fetch_on(&worker, key, owner, placement).await {
                Ok(resolution) => {
                    self.selector.record(placement, &worker);
                    return Ok(resolution);
                }
                Err(e) if e.is_retryable() => {
                    warn!(worker = %worker.name, key = %key, "worker unavailable, trying next: {}", e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| HangarError::Internal("no candidate attempted".to_string())))
    }

    /// Drop `owner`'s previous use and resolve the new tuple
    ///
    /// Used when a resource's configuration changes; the old cache becomes
    /// collectable once its last use is gone.
    pub async fn invalidate(
        &self,
        owner: &Owner,
        key: &CacheKey,
        placement: &PlacementRequest,
    ) -> HangarResult<Resolution> {
        let released = self.ledger.release_uses(owner).await?;
        debug!(owner = %owner, released, "released previous cache uses");
        self.resolve(key, owner, placement).await
    }

    /// Remove every use held by `owner`
    pub async fn release(&self, owner: &Owner) -> HangarResult<usize> {
        self.ledger.release_uses(owner).await
    }

    async fn fetch_on(
        &self,
        worker: &Worker,
        key: &CacheKey,
        owner: &Owner,
        placement: &PlacementRequest,
    ) -> HangarResult<Resolution> {
        let spec = VolumeSpec::empty(VolumeType::ResourceCache, placement.team.clone());
        let record = self.ledger.create_volume(&worker.name, &spec).await?;

        let result = async {
            let volume = self.pool.create_volume(&worker.name, &spec).await?;
            self.executor.fetch(worker, &volume, key).await?;
            self.ledger.commit_resource_cache(key, &record.handle, owner).await
        }
        .await;

        match result {
            Ok(commit) => {
                if commit.adopted {
                    info!(cache = commit.cache.id, key = %key, worker = %worker.name, "cached resource");
                }
                Ok(Resolution {
                    cache: commit.cache,
                    volume: commit.volume,
                    created: commit.adopted,
                })
            }
            Err(e) => {
                if let Err(abandon) = self.ledger.abandon_volume(&record.handle).await {
                    warn!(handle = %record.handle, "failed to abandon volume: {}", abandon);
                }
                Err(e)
            }
        }
    }
}
