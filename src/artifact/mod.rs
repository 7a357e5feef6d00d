//! User-uploaded build artifacts
//!
//! Creation is strictly ordered: volume create, initialize at `/`, stream
//! in, then commit the ledger row. Nothing is visible to `fetch` until the
//! commit, and a failure or cancellation at any earlier step leaves an
//! orphan volume for the sweeper instead of a rollback.

use crate::error::{HangarError, HangarResult};
use crate::ledger::{ArtifactRecord, Ledger, NewArtifact};
use crate::volume::{ByteStream, VolumeRecord, VolumeSpec, VolumeType, WorkerPool, ROOT_PATH};
use crate::worker::{PlacementRequest, TeamId, WorkerSelector};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ArtifactService {
    ledger: Arc<dyn Ledger>,
    pool: Arc<WorkerPool>,
    selector: WorkerSelector,
}

impl ArtifactService {
    pub fn new(ledger: Arc<dyn Ledger>, pool: Arc<WorkerPool>, selector: WorkerSelector) -> Self {
        Self {
            ledger,
            pool,
            selector,
        }
    }

    /// Store `data` as a new artifact owned by `team`
    pub async fn create(&self, team: &TeamId, data: ByteStream) -> HangarResult<ArtifactRecord> {
        let volume = self.create_volume(team).await?;

        let result = async {
            self.pool
                .initialize_artifact(&volume.worker, &volume.handle, ROOT_PATH, "")
                .await?;
            let bytes = self
                .pool
                .stream_in(&volume.worker, &volume.handle, ROOT_PATH, data)
                .await?;
            let record = self
                .ledger
                .commit_artifact(NewArtifact {
                    team: team.clone(),
                    volume: volume.handle.clone(),
                    path: ROOT_PATH.to_string(),
                    checksum: String::new(),
                })
                .await?;
            Ok::<_, HangarError>((record, bytes))
        }
        .await;

        match result {
            Ok((record, bytes)) => {
                info!(team = %team, artifact = record.id, worker = %volume.worker, bytes, "created artifact");
                Ok(record)
            }
            Err(e) => {
                warn!(team = %team, handle = %volume.handle, "artifact creation failed: {}", e);
                if let Err(abandon) = self.ledger.abandon_volume(&volume.handle).await {
                    warn!(handle = %volume.handle, "failed to abandon volume: {}", abandon);
                }
                Err(e)
            }
        }
    }

    /// Stream the contents of `team`'s artifact `id`
    pub async fn fetch(&self, team: &TeamId, id: i64) -> HangarResult<ByteStream> {
        let volume = self
            .ledger
            .find_volume_for_artifact(team, id)
            .await?
            .ok_or(HangarError::ArtifactNotFound(id))?;

        let found = self
            .pool
            .lookup_volume(&volume.worker, &volume.handle)
            .await?
            .ok_or_else(|| HangarError::VolumeNotFound(volume.handle.clone()))?;

        debug!(team = %team, artifact = id, worker = %found.worker, "streaming artifact");
        self.pool
            .stream_out(&found.worker, &found.handle, ROOT_PATH)
            .await
    }

    /// Delete the artifact row; its volume is reaped on the next sweep
    pub async fn destroy(&self, team: &TeamId, id: i64) -> HangarResult<()> {
        if self.ledger.delete_artifact(team, id).await? {
            info!(team = %team, artifact = id, "destroyed artifact");
            Ok(())
        } else {
            Err(HangarError::ArtifactNotFound(id))
        }
    }

    /// Create a ledger row and a physical volume on the first reachable
    /// worker the team may use
    async fn create_volume(&self, team: &TeamId) -> HangarResult<VolumeRecord> {
        let workers = self.ledger.list_workers().await?;
        let placement = PlacementRequest::new(Some(team.clone()));
        let ranked = self.selector.rank(&workers, &placement)?;

        let mut last_err = None;
        for worker in ranked {
            let spec = VolumeSpec::empty(VolumeType::Artifact, Some(team.clone()));
            let record = self.ledger.create_volume(&worker.name, &spec).await?;
            match self.pool.create_volume(&worker.name, &spec).await {
                Ok(_) => return Ok(record),
                Err(e) => {
                    self.ledger.abandon_volume(&record.handle).await?;
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(worker = %worker.name, "worker unavailable, trying next: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| HangarError::Internal("no candidate attempted".to_string())))
    }
}
