//! Single-node wiring of ledger, volume stores and services
//!
//! A node owns a snapshot-backed [`MemoryLedger`] and one
//! [`LocalVolumeStore`] per configured worker. The `[[workers]]` config
//! section is the worker registration source: workers listed there are
//! upserted on open, and ledger workers no longer listed are retired.

use crate::api::{Accessor, ApiState};
use crate::artifact::ArtifactService;
use crate::cache::{FetchExecutor, ResourceCacheEngine};
use crate::config::{Config, ConfigManager};
use crate::error::HangarResult;
use crate::gc::Sweeper;
use crate::ledger::{Ledger, MemoryLedger};
use crate::volume::{LocalVolumeStore, VolumeStore, WorkerPool};
use crate::worker::{AffinityStore, Worker, WorkerSelector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Node {
    config: Config,
    ledger: Arc<MemoryLedger>,
    pool: Arc<WorkerPool>,
    affinity: Option<Arc<AffinityStore>>,
}

impl Node {
    /// Load the ledger snapshot and connect the configured workers
    pub async fn open(config: &Config) -> HangarResult<Self> {
        ConfigManager::ensure_state_dirs(config).await?;

        let ledger = Arc::new(MemoryLedger::open(ConfigManager::snapshot_path(config)).await?);
        let pool = Arc::new(WorkerPool::new(config.rpc.timeout()));
        let content_root = ConfigManager::content_root(config);
        let affinity = config
            .placement
            .affinity
            .then(|| Arc::new(AffinityStore::new()));

        let node = Self {
            config: config.clone(),
            ledger,
            pool,
            affinity,
        };

        let configured: HashSet<&str> = config.workers.iter().map(|w| w.name.as_str()).collect();
        for stale in node.ledger.list_workers().await? {
            if !configured.contains(stale.name.as_str()) {
                debug!(worker = %stale.name, "worker removed from config");
                node.retire_worker(&stale.name).await?;
            }
        }

        for worker_config in &config.workers {
            let worker = Worker::from(worker_config);
            let store: Arc<dyn VolumeStore> = Arc::new(LocalVolumeStore::new(
                worker.name.clone(),
                content_root.join(&worker.name),
            ));
            node.pool.register(store);
            debug!(worker = %worker.name, state = %worker.state, "registered worker");
            node.ledger.upsert_worker(worker).await?;
        }

        Ok(node)
    }

    /// Declare `worker` permanently gone
    ///
    /// Its volumes are force-orphaned and the sweeper drops their rows
    /// without contacting it. Returns how many volumes were orphaned.
    pub async fn retire_worker(&self, worker: &str) -> HangarResult<usize> {
        let orphaned = self.ledger.retire_worker(worker).await?;
        self.pool.deregister(worker);
        if let Some(affinity) = &self.affinity {
            let forgotten = affinity.forget_worker(worker);
            debug!(worker, forgotten, "dropped affinity entries");
        }
        info!(worker, volumes = orphaned.len(), "retired worker");
        Ok(orphaned.len())
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn selector(&self) -> WorkerSelector {
        match &self.affinity {
            Some(store) => WorkerSelector::new(store.clone()),
            None => WorkerSelector::without_affinity(),
        }
    }

    pub fn artifact_service(&self) -> ArtifactService {
        ArtifactService::new(self.ledger(), self.pool(), self.selector())
    }

    pub fn cache_engine(&self, executor: Arc<dyn FetchExecutor>) -> ResourceCacheEngine {
        ResourceCacheEngine::new(self.ledger(), self.pool(), self.selector(), executor)
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.config.gc.clone(), self.ledger(), self.pool())
    }

    pub fn api_state(&self, accessor: Arc<dyn Accessor>) -> Arc<ApiState> {
        Arc::new(ApiState {
            artifacts: self.artifact_service(),
            accessor,
            max_artifact_bytes: self.config.api.max_artifact_bytes,
        })
    }

    /// Persist the ledger snapshot
    pub async fn save(&self) -> HangarResult<()> {
        self.ledger.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::WorkerConfig;
    use crate::worker::{TeamId, WorkerState};
    use tempfile::TempDir;

    fn config(temp: &TempDir, workers: &[&str]) -> Config {
        let mut config = Config::default();
        config.ledger.snapshot_path = Some(temp.path().join("ledger.json"));
        config.store.content_root = Some(temp.path().join("volumes"));
        config.workers = workers
            .iter()
            .map(|name| WorkerConfig {
                name: name.to_string(),
                tags: Vec::new(),
                team: None,
                state: WorkerState::Running,
            })
            .collect();
        config
    }

    #[tokio::test]
    async fn open_registers_configured_workers() {
        let temp = TempDir::new().unwrap();
        let node = Node::open(&config(&temp, &["w1", "w2"])).await.unwrap();

        let names: Vec<String> = node
            .ledger()
            .list_workers()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, ["w1", "w2"]);
        assert!(node.pool().contains("w1"));
    }

    #[tokio::test]
    async fn retiring_a_worker_drops_its_placement_state() {
        use crate::worker::AffinityKey;

        let temp = TempDir::new().unwrap();
        let node = Node::open(&config(&temp, &["w1", "w2"])).await.unwrap();
        let affinity = node.affinity.clone().unwrap();
        affinity.remember(AffinityKey::new("git", None), "w1");
        affinity.remember(AffinityKey::new("time", None), "w2");

        assert_eq!(node.retire_worker("w1").await.unwrap(), 0);

        assert!(!node.pool().contains("w1"));
        assert_eq!(affinity.len(), 1);
        assert_eq!(node.ledger().counts().await.unwrap().workers, 1);
    }

    #[tokio::test]
    async fn removed_worker_is_retired_on_reopen() {
        let temp = TempDir::new().unwrap();
        let node = Node::open(&config(&temp, &["w1", "w2"])).await.unwrap();
        let record = node
            .artifact_service()
            .create(
                &TeamId::new("main"),
                Box::pin(futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
                    bytes::Bytes::from_static(b"x"),
                )])),
            )
            .await
            .unwrap();
        node.save().await.unwrap();

        let worker = node
            .ledger()
            .list_volumes()
            .await
            .unwrap()
            .remove(0)
            .worker;
        let remaining: Vec<&str> = ["w1", "w2"].into_iter().filter(|w| *w != worker).collect();

        let reopened = Node::open(&config(&temp, &remaining)).await.unwrap();
        let counts = reopened.ledger().counts().await.unwrap();
        assert_eq!(counts.workers, 1);
        assert!(reopened
            .ledger()
            .find_volume_for_artifact(&TeamId::new("main"), record.id)
            .await
            .unwrap()
            .is_none());

        let report = reopened.sweeper().sweep_once().await;
        assert_eq!(report.volumes_destroyed, 1);
    }
}
