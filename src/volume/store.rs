//! Worker volume RPC abstraction
//!
//! Provides a trait for the volume operations a worker exposes. The
//! transport used to reach a worker is not Hangar's concern; the local
//! filesystem store implements it in-process.

use crate::error::HangarResult;
use crate::volume::{VolumeSpec, WorkerVolume};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;

/// Owned byte stream used for stream-in and stream-out
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Abstract volume store hosted by one worker
///
/// Every method may block on the network. Callers bound them with a
/// timeout and may drop the future to cancel.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Name of the worker this store belongs to
    fn worker_name(&self) -> &str;

    /// Create an empty volume
    async fn create_volume(&self, spec: &VolumeSpec) -> HangarResult<WorkerVolume>;

    /// Look up a volume by handle; `Ok(None)` when the worker doesn't have it
    async fn lookup_volume(&self, handle: &str) -> HangarResult<Option<WorkerVolume>>;

    /// Prepare `path` inside the volume to receive a whole artifact
    async fn initialize_artifact(&self, handle: &str, path: &str, checksum: &str) -> HangarResult<()>;

    /// Write `data` at `path`, returning the number of bytes stored
    async fn stream_in(&self, handle: &str, path: &str, data: ByteStream) -> HangarResult<u64>;

    /// Read back everything stored at `path`
    async fn stream_out(&self, handle: &str, path: &str) -> HangarResult<ByteStream>;

    /// Delete the volume; a volume that's already gone is not an error
    async fn destroy_volume(&self, handle: &str) -> HangarResult<()>;
}
