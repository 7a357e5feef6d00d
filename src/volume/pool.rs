//! Registry of reachable volume stores, one per worker
//!
//! Every call through the pool is bounded by the configured RPC timeout;
//! a timeout or a worker with no registered store is reported as
//! `WorkerUnavailable` so callers can move on or retry later. Stream-in is
//! bounded by idle time instead: the clock restarts on every chunk.

use crate::error::{HangarError, HangarResult};
use crate::volume::store::{ByteStream, VolumeStore};
use crate::volume::{VolumeSpec, WorkerVolume};
use futures_util::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Worker name to volume store mapping
pub struct WorkerPool {
    stores: RwLock<HashMap<String, Arc<dyn VolumeStore>>>,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Make a worker's store reachable
    pub fn register(&self, store: Arc<dyn VolumeStore>) {
        let name = store.worker_name().to_string();
        debug!(worker = %name, "registered volume store");
        self.stores.write().insert(name, store);
    }

    /// Forget a worker's store
    pub fn deregister(&self, worker: &str) -> bool {
        self.stores.write().remove(worker).is_some()
    }

    pub fn contains(&self, worker: &str) -> bool {
        self.stores.read().contains_key(worker)
    }

    /// Store for `worker`, or `WorkerUnavailable` if none is registered
    pub fn store(&self, worker: &str) -> HangarResult<Arc<dyn VolumeStore>> {
        self.stores
            .read()
            .get(worker)
            .cloned()
            .ok_or_else(|| HangarError::unavailable(worker, "no volume store registered"))
    }

    /// Run `op` against `worker`'s store under the RPC timeout
    pub async fn call<T, F, Fut>(&self, worker: &str, op: F) -> HangarResult<T>
    where
        F: FnOnce(Arc<dyn VolumeStore>) -> Fut,
        Fut: Future<Output = HangarResult<T>>,
    {
        let store = self.store(worker)?;
        match tokio::time::timeout(self.timeout, op(store)).await {
            Ok(result) => result,
            Err(_) => Err(HangarError::unavailable(
                worker,
                format!("timed out after {}s", self.timeout.as_secs_f32()),
            )),
        }
    }

    pub async fn create_volume(&self, worker: &str, spec: &VolumeSpec) -> HangarResult<WorkerVolume> {
        self.call(worker, |s| async move { s.create_volume(spec).await })
            .await
    }

    pub async fn lookup_volume(&self, worker: &str, handle: &str) -> HangarResult<Option<WorkerVolume>> {
        self.call(worker, |s| async move { s.lookup_volume(handle).await })
            .await
    }

    pub async fn initialize_artifact(
        &self,
        worker: &str,
        handle: &str,
        path: &str,
        checksum: &str,
    ) -> HangarResult<()> {
        self.call(worker, |s| async move {
            s.initialize_artifact(handle, path, checksum).await
        })
        .await
    }

    /// Stream `data` into a volume, failing once no chunk has moved for
    /// the RPC timeout
    pub async fn stream_in(
        &self,
        worker: &str,
        handle: &str,
        path: &str,
        data: ByteStream,
    ) -> HangarResult<u64> {
        let store = self.store(worker)?;
        let progress = Arc::new(Notify::new());
        let data: ByteStream = {
            let progress = progress.clone();
            Box::pin(data.inspect(move |_| progress.notify_one()))
        };

        let upload = store.stream_in(handle, path, data);
        tokio::pin!(upload);
        loop {
            tokio::select! {
                result = &mut upload => return result,
                _ = progress.notified() => continue,
                _ = tokio::time::sleep(self.timeout) => {
                    return Err(HangarError::unavailable(
                        worker,
                        format!("stream idle for {}s", self.timeout.as_secs_f32()),
                    ));
                }
            }
        }
    }

    /// Open a stream-out; the timeout covers opening, not draining
    pub async fn stream_out(&self, worker: &str, handle: &str, path: &str) -> HangarResult<ByteStream> {
        self.call(worker, |s| async move { s.stream_out(handle, path).await })
            .await
    }

    pub async fn destroy_volume(&self, worker: &str, handle: &str) -> HangarResult<()> {
        self.call(worker, |s| async move { s.destroy_volume(handle).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{LocalVolumeStore, VolumeType};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct HangingStore;

    #[async_trait]
    impl VolumeStore for HangingStore {
        fn worker_name(&self) -> &str {
            "hanging"
        }

        async fn create_volume(&self, _spec: &VolumeSpec) -> HangarResult<WorkerVolume> {
            std::future::pending().await
        }

        async fn lookup_volume(&self, _handle: &str) -> HangarResult<Option<WorkerVolume>> {
            std::future::pending().await
        }

        async fn initialize_artifact(&self, _: &str, _: &str, _: &str) -> HangarResult<()> {
            std::future::pending().await
        }

        async fn stream_in(&self, _: &str, _: &str, _: ByteStream) -> HangarResult<u64> {
            std::future::pending().await
        }

        async fn stream_out(&self, _: &str, _: &str) -> HangarResult<ByteStream> {
            std::future::pending().await
        }

        async fn destroy_volume(&self, _handle: &str) -> HangarResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn unregistered_worker_is_unavailable() {
        let pool = WorkerPool::new(Duration::from_secs(1));
        let err = pool.lookup_volume("ghost", "h").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn calls_are_bounded_by_timeout() {
        let pool = WorkerPool::new(Duration::from_millis(20));
        pool.register(Arc::new(HangingStore));

        let spec = VolumeSpec::empty(VolumeType::Container, None);
        let err = pool.create_volume("hanging", &spec).await.unwrap_err();
        assert!(matches!(err, HangarError::WorkerUnavailable { ref worker, .. } if worker == "hanging"));
    }

    fn paced(chunks: usize, every: Duration) -> ByteStream {
        Box::pin(futures_util::stream::iter(0..chunks).then(move |_| async move {
            tokio::time::sleep(every).await;
            Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"chunk"))
        }))
    }

    #[tokio::test]
    async fn slow_upload_outlasts_timeout_while_chunks_flow() {
        let temp = TempDir::new().unwrap();
        let pool = WorkerPool::new(Duration::from_millis(300));
        pool.register(Arc::new(LocalVolumeStore::new("w1", temp.path())));
        let spec = VolumeSpec::empty(VolumeType::Artifact, None);
        pool.create_volume("w1", &spec).await.unwrap();

        let written = pool
            .stream_in("w1", &spec.handle, "/", paced(4, Duration::from_millis(150)))
            .await
            .unwrap();
        assert_eq!(written, 20);
    }

    #[tokio::test]
    async fn stalled_upload_times_out() {
        let temp = TempDir::new().unwrap();
        let pool = WorkerPool::new(Duration::from_millis(100));
        pool.register(Arc::new(LocalVolumeStore::new("w1", temp.path())));
        let spec = VolumeSpec::empty(VolumeType::Artifact, None);
        pool.create_volume("w1", &spec).await.unwrap();

        let stalled: ByteStream = Box::pin(
            futures_util::stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"x"))])
                .chain(futures_util::stream::pending()),
        );
        let err = pool
            .stream_in("w1", &spec.handle, "/", stalled)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn routes_to_registered_store() {
        let temp = TempDir::new().unwrap();
        let pool = WorkerPool::new(Duration::from_secs(5));
        pool.register(Arc::new(LocalVolumeStore::new("w1", temp.path())));

        let spec = VolumeSpec::empty(VolumeType::Container, None);
        let volume = pool.create_volume("w1", &spec).await.unwrap();
        assert_eq!(volume.handle, spec.handle);
        assert!(pool.lookup_volume("w1", &spec.handle).await.unwrap().is_some());

        assert!(pool.deregister("w1"));
        assert!(!pool.contains("w1"));
    }
}
