//! Background reclamation of unreferenced caches and volumes
//!
//! Each sweep cycle runs three ordered phases:
//!
//! 1. **Edge reap**: drop cache uses whose owner no longer exists
//! 2. **Cache reap**: drop caches with no remaining uses
//! 3. **Volume reap**: claim volumes whose owner no longer resolves, destroy
//!    them on their worker, then drop the ledger row
//!
//! Any number of sweepers may share a ledger. Phase 3 claims rows with a
//! lease, so a row being destroyed by one sweeper is invisible to the
//! others. An unreachable worker releases the claim and the volume is
//! retried on a later cycle.

use crate::config::schema::GcConfig;
use crate::error::HangarResult;
use crate::ledger::{Ledger, VolumeClaim};
use crate::volume::{VolumeRecord, WorkerPool};
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one sweep cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub uses_reaped: usize,
    pub caches_reaped: usize,
    pub volumes_destroyed: usize,
    /// Volumes left for a later cycle because their worker was unreachable
    pub volumes_deferred: usize,
    /// Deferred volumes that have used up the retry budget
    pub volumes_overdue: usize,
    /// Non-fatal errors; the sweep continues past them
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn merge(&mut self, other: Self) {
        self.uses_reaped += other.uses_reaped;
        self.caches_reaped += other.caches_reaped;
        self.volumes_destroyed += other.volumes_destroyed;
        self.volumes_deferred += other.volumes_deferred;
        self.volumes_overdue += other.volumes_overdue;
        self.errors.extend(other.errors);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the cycle changed anything
    pub fn is_empty(&self) -> bool {
        self.uses_reaped == 0
            && self.caches_reaped == 0
            && self.volumes_destroyed == 0
            && self.volumes_deferred == 0
    }
}

enum Outcome {
    Destroyed,
    Deferred { overdue: bool },
    Failed(String),
}

/// One reclamation loop; many may run against the same ledger
pub struct Sweeper {
    id: Uuid,
    config: GcConfig,
    ledger: Arc<dyn Ledger>,
    pool: Arc<WorkerPool>,
}

impl Sweeper {
    pub fn new(config: GcConfig, ledger: Arc<dyn Ledger>, pool: Arc<WorkerPool>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            ledger,
            pool,
        }
    }

    /// Run one cycle. Phase failures are logged and recorded; they never
    /// abort the remaining phases.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.ledger.reap_dead_uses().await {
            Ok(n) => report.uses_reaped = n,
            Err(e) => {
                warn!(sweeper = %self.id, "edge reap failed: {}", e);
                report.errors.push(format!("edge reap: {}", e));
            }
        }

        match self.ledger.reap_unused_caches().await {
            Ok(n) => report.caches_reaped = n,
            Err(e) => {
                warn!(sweeper = %self.id, "cache reap failed: {}", e);
                report.errors.push(format!("cache reap: {}", e));
            }
        }

        match self.reap_volumes().await {
            Ok(volumes) => report.merge(volumes),
            Err(e) => {
                warn!(sweeper = %self.id, "volume reap failed: {}", e);
                report.errors.push(format!("volume reap: {}", e));
            }
        }

        if report.is_empty() {
            debug!(sweeper = %self.id, "sweep found nothing to reclaim");
        } else {
            info!(
                sweeper = %self.id,
                uses = report.uses_reaped,
                caches = report.caches_reaped,
                destroyed = report.volumes_destroyed,
                deferred = report.volumes_deferred,
                "sweep complete"
            );
        }
        report
    }

    /// Sweep every `gc.interval_secs` until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            sweeper = %self.id,
            interval_secs = self.config.interval().as_secs(),
            bound_secs = self.config.reclamation_bound().as_secs(),
            "sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(sweeper = %self.id, "sweeper stopped");
    }

    async fn reap_volumes(&self) -> HangarResult<SweepReport> {
        let known: HashSet<String> = self
            .ledger
            .list_workers()
            .await?
            .into_iter()
            .map(|w| w.name)
            .collect();

        let claim = VolumeClaim {
            sweeper: self.id,
            now: Utc::now(),
            lease: chrono_duration(Duration::from_secs(self.config.claim_lease_secs)),
            creating_grace: chrono_duration(Duration::from_secs(self.config.creating_grace_secs)),
            limit: self.config.batch_size.max(1),
        };
        let claimed = self.ledger.claim_orphaned_volumes(&claim).await?;

        let outcomes = join_all(claimed.iter().map(|v| self.destroy(v, &known))).await;

        let mut report = SweepReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Destroyed => report.volumes_destroyed += 1,
                Outcome::Deferred { overdue } => {
                    report.volumes_deferred += 1;
                    if overdue {
                        report.volumes_overdue += 1;
                    }
                }
                Outcome::Failed(e) => report.errors.push(e),
            }
        }
        Ok(report)
    }

    async fn destroy(&self, volume: &VolumeRecord, known: &HashSet<String>) -> Outcome {
        // A retired worker takes its content with it; only the row remains.
        if known.contains(&volume.worker) {
            if let Err(e) = self.pool.destroy_volume(&volume.worker, &volume.handle).await {
                let attempts = match self.ledger.release_volume_claim(&volume.handle, self.id).await {
                    Ok(attempts) => attempts,
                    Err(release) => {
                        warn!(handle = %volume.handle, "failed to release claim: {}", release);
                        0
                    }
                };
                if e.is_retryable() {
                    let overdue = attempts >= self.config.retry_budget.max(1);
                    if overdue {
                        warn!(
                            worker = %volume.worker,
                            handle = %volume.handle,
                            attempts,
                            "volume past its {}s reclamation bound: {}",
                            self.config.reclamation_bound().as_secs(),
                            e
                        );
                    } else {
                        debug!(worker = %volume.worker, handle = %volume.handle, "worker unreachable, deferring: {}", e);
                    }
                    return Outcome::Deferred { overdue };
                }
                warn!(worker = %volume.worker, handle = %volume.handle, "destroy failed: {}", e);
                return Outcome::Failed(format!("destroy {}: {}", volume.handle, e));
            }
        } else {
            debug!(worker = %volume.worker, handle = %volume.handle, "worker gone, dropping row");
        }

        match self.ledger.finish_volume_destroy(&volume.handle).await {
            Ok(true) => Outcome::Destroyed,
            Ok(false) => {
                debug!(handle = %volume.handle, "row already gone");
                Outcome::Destroyed
            }
            Err(e) => Outcome::Failed(format!("finish {}: {}", volume.handle, e)),
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, ResourceVersion};
    use crate::ledger::{MemoryLedger, NewArtifact, Owner};
    use crate::volume::{LocalVolumeStore, VolumeSpec, VolumeStore, VolumeType};
    use crate::worker::{TeamId, Worker};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        ledger: Arc<MemoryLedger>,
        pool: Arc<WorkerPool>,
    }

    impl Fixture {
        async fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let ledger = Arc::new(MemoryLedger::new());
            let pool = Arc::new(WorkerPool::new(Duration::from_secs(5)));
            let fixture = Self { temp, ledger, pool };
            fixture.add_worker("w1", true).await;
            fixture
        }

        async fn add_worker(&self, name: &str, reachable: bool) {
            self.ledger.upsert_worker(Worker::new(name)).await.unwrap();
            if reachable {
                self.connect(name);
            }
        }

        fn connect(&self, name: &str) {
            let store: Arc<dyn VolumeStore> =
                Arc::new(LocalVolumeStore::new(name, self.root(name)));
            self.pool.register(store);
        }

        fn root(&self, worker: &str) -> PathBuf {
            self.temp.path().join(worker)
        }

        fn sweeper(&self) -> Sweeper {
            Sweeper::new(GcConfig::default(), self.ledger.clone(), self.pool.clone())
        }

        /// Volume created on the worker and in the ledger, still `creating`
        async fn volume(&self, worker: &str, volume_type: VolumeType) -> VolumeSpec {
            let spec = VolumeSpec::empty(volume_type, None);
            self.ledger.create_volume(worker, &spec).await.unwrap();
            if self.pool.contains(worker) {
                self.pool.create_volume(worker, &spec).await.unwrap();
            }
            spec
        }

        async fn orphan(&self, worker: &str) -> VolumeSpec {
            let spec = self.volume(worker, VolumeType::Container).await;
            self.ledger.abandon_volume(&spec.handle).await.unwrap();
            spec
        }
    }

    fn exists(root: &Path, handle: &str) -> bool {
        root.join(handle).exists()
    }

    #[tokio::test]
    async fn removed_resource_releases_cache_and_volume() {
        let f = Fixture::new().await;
        let owner = Owner::Resource(1);
        f.ledger.register_owner(owner.clone()).await.unwrap();

        let spec = f.volume("w1", VolumeType::ResourceCache).await;
        let key = CacheKey::new("time", ResourceVersion::new().with("time", "t1"), "d");
        f.ledger
            .commit_resource_cache(&key, &spec.handle, &owner)
            .await
            .unwrap();

        let sweeper = f.sweeper();
        assert!(sweeper.sweep_once().await.is_empty());
        assert!(exists(&f.root("w1"), &spec.handle));

        // pipeline edited: the resource is gone
        f.ledger.remove_owner(&owner).await.unwrap();
        let report = sweeper.sweep_once().await;

        assert_eq!(report.uses_reaped, 1);
        assert_eq!(report.caches_reaped, 1);
        assert_eq!(report.volumes_destroyed, 1);
        assert!(!report.has_errors());
        assert!(!exists(&f.root("w1"), &spec.handle));
        assert_eq!(f.ledger.counts().await.unwrap().volumes, 0);
    }

    #[tokio::test]
    async fn cache_outlives_owner_while_another_uses_it() {
        let f = Fixture::new().await;
        let (a, b) = (Owner::Build(1), Owner::Build(2));
        f.ledger.register_owner(a.clone()).await.unwrap();
        f.ledger.register_owner(b.clone()).await.unwrap();

        let spec = f.volume("w1", VolumeType::ResourceCache).await;
        let key = CacheKey::new("git", ResourceVersion::new().with("ref", "abc"), "d");
        f.ledger.commit_resource_cache(&key, &spec.handle, &a).await.unwrap();
        f.ledger.find_and_use_resource_cache(&key, &b).await.unwrap();

        f.ledger.remove_owner(&a).await.unwrap();
        let report = f.sweeper().sweep_once().await;
        assert_eq!(report.uses_reaped, 1);
        assert_eq!(report.caches_reaped, 0);
        assert_eq!(report.volumes_destroyed, 0);
        assert!(exists(&f.root("w1"), &spec.handle));
    }

    #[tokio::test]
    async fn concurrent_sweepers_never_double_destroy() {
        let f = Fixture::new().await;
        for _ in 0..10 {
            f.orphan("w1").await;
        }

        let (a, b) = (f.sweeper(), f.sweeper());
        let (ra, rb) = tokio::join!(a.sweep_once(), b.sweep_once());

        assert_eq!(ra.volumes_destroyed + rb.volumes_destroyed, 10);
        assert!(!ra.has_errors() && !rb.has_errors());
        assert_eq!(f.ledger.counts().await.unwrap().volumes, 0);
    }

    #[tokio::test]
    async fn unreachable_worker_is_retried_next_cycle() {
        let f = Fixture::new().await;
        f.add_worker("w2", false).await;
        let spec = f.orphan("w2").await;

        let sweeper = f.sweeper();
        let report = sweeper.sweep_once().await;
        assert_eq!(report.volumes_deferred, 1);
        assert!(!report.has_errors());
        assert!(f.ledger.find_volume(&spec.handle).await.unwrap().is_some());

        f.connect("w2");
        let report = sweeper.sweep_once().await;
        assert_eq!(report.volumes_destroyed, 1);
        assert!(f.ledger.find_volume(&spec.handle).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deferral_past_retry_budget_is_reported_overdue() {
        let f = Fixture::new().await;
        f.add_worker("w2", false).await;
        f.orphan("w2").await;

        let config = GcConfig {
            retry_budget: 2,
            ..GcConfig::default()
        };
        let sweeper = Sweeper::new(config, f.ledger.clone(), f.pool.clone());

        let first = sweeper.sweep_once().await;
        assert_eq!((first.volumes_deferred, first.volumes_overdue), (1, 0));

        let second = sweeper.sweep_once().await;
        assert_eq!((second.volumes_deferred, second.volumes_overdue), (1, 1));

        let mut total = first;
        total.merge(second);
        assert_eq!(total.volumes_overdue, 1);
        assert!(!total.has_errors());
    }

    #[tokio::test]
    async fn retired_worker_rows_are_dropped() {
        let f = Fixture::new().await;
        f.add_worker("w2", false).await;
        let owner = Owner::Container("c-1".to_string());
        f.ledger.register_owner(owner).await.unwrap();
        let spec = f.volume("w2", VolumeType::Container).await;
        f.ledger
            .mark_volume_created(
                &spec.handle,
                Some(crate::volume::VolumeOwner::Container("c-1".to_string())),
            )
            .await
            .unwrap();

        f.ledger.retire_worker("w2").await.unwrap();
        let report = f.sweeper().sweep_once().await;

        assert_eq!(report.volumes_destroyed, 1);
        assert_eq!(report.volumes_deferred, 0);
        assert!(f.ledger.find_volume(&spec.handle).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_flight_volumes_survive_until_grace_expires() {
        let f = Fixture::new().await;
        let spec = f.volume("w1", VolumeType::ResourceCache).await;

        let report = f.sweeper().sweep_once().await;
        assert_eq!(report.volumes_destroyed, 0);

        let config = GcConfig {
            creating_grace_secs: 0,
            ..GcConfig::default()
        };
        let impatient = Sweeper::new(config, f.ledger.clone(), f.pool.clone());
        assert_eq!(impatient.sweep_once().await.volumes_destroyed, 1);
        assert!(!exists(&f.root("w1"), &spec.handle));
    }

    #[tokio::test]
    async fn deleted_artifact_volume_is_reaped() {
        let f = Fixture::new().await;
        let team = TeamId::new("main");
        let spec = f.volume("w1", VolumeType::Artifact).await;
        let record = f
            .ledger
            .commit_artifact(NewArtifact {
                team: team.clone(),
                volume: spec.handle.clone(),
                path: "/".to_string(),
                checksum: String::new(),
            })
            .await
            .unwrap();

        let sweeper = f.sweeper();
        assert_eq!(sweeper.sweep_once().await.volumes_destroyed, 0);

        f.ledger.delete_artifact(&team, record.id).await.unwrap();
        assert_eq!(sweeper.sweep_once().await.volumes_destroyed, 1);
    }

    #[tokio::test]
    async fn batch_size_bounds_a_cycle() {
        let f = Fixture::new().await;
        for _ in 0..5 {
            f.orphan("w1").await;
        }

        let config = GcConfig {
            batch_size: 2,
            ..GcConfig::default()
        };
        let sweeper = Sweeper::new(config, f.ledger.clone(), f.pool.clone());
        assert_eq!(sweeper.sweep_once().await.volumes_destroyed, 2);
        assert_eq!(sweeper.sweep_once().await.volumes_destroyed, 2);
        assert_eq!(sweeper.sweep_once().await.volumes_destroyed, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = Fixture::new().await;
        f.orphan("w1").await;

        let sweeper = Arc::new(f.sweeper());
        let (tx, rx) = watch::channel(false);
        let task = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run(rx).await })
        };

        // the first tick fires immediately
        for _ in 0..50 {
            if f.ledger.counts().await.unwrap().volumes == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.ledger.counts().await.unwrap().volumes, 0);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
