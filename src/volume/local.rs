//! Filesystem-backed volume store
//!
//! Each volume is a directory under the worker's content root:
//!
//! ```text
//! <root>/<handle>/volume.json     spec + creation time
//! <root>/<handle>/artifact.json   present once initialized as an artifact
//! <root>/<handle>/content/...     streamed data, one `.stream` file per path
//! ```
//!
//! Stream-in writes to a partial file and renames it into place only
//! after the last byte lands, so a failed or cancelled upload never
//! leaves half-written content behind.

use crate::error::{HangarError, HangarResult};
use crate::volume::store::{ByteStream, VolumeStore};
use crate::volume::{VolumeSpec, WorkerVolume};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

const SPEC_FILE: &str = "volume.json";
const ARTIFACT_FILE: &str = "artifact.json";
const CONTENT_DIR: &str = "content";
const STREAM_FILE: &str = ".stream";
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct VolumeMeta {
    spec: VolumeSpec,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactMeta {
    path: String,
    checksum: String,
}

/// Removes a partially written file unless disarmed
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Volume store keeping content on the local filesystem
pub struct LocalVolumeStore {
    worker: String,
    root: PathBuf,
}

impl LocalVolumeStore {
    /// Create a store for `worker` rooted at `root`
    pub fn new(worker: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            worker: worker.into(),
            root: root.into(),
        }
    }

    fn volume_dir(&self, handle: &str) -> HangarResult<PathBuf> {
        let valid = !handle.is_empty()
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(HangarError::PathInvalid {
                path: handle.to_string(),
                reason: "volume handles may only contain [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(self.root.join(handle))
    }

    /// Directory inside the volume that holds data for `path`
    fn content_dir(&self, handle: &str, path: &str) -> HangarResult<PathBuf> {
        let mut dir = self.volume_dir(handle)?.join(CONTENT_DIR);
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => dir.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(HangarError::PathInvalid {
                        path: path.to_string(),
                        reason: "must stay inside the volume".to_string(),
                    })
                }
            }
        }
        Ok(dir)
    }

    async fn require_volume(&self, handle: &str) -> HangarResult<PathBuf> {
        let dir = self.volume_dir(handle)?;
        if fs::try_exists(dir.join(SPEC_FILE))
            .await
            .map_err(|e| HangarError::io(format!("checking volume {}", handle), e))?
        {
            Ok(dir)
        } else {
            Err(HangarError::VolumeNotFound(handle.to_string()))
        }
    }
}

async fn read_chunk(mut file: fs::File) -> std::io::Result<Option<(Bytes, fs::File)>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let n = file.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((Bytes::from(buf), file)))
}

#[async_trait]
impl VolumeStore for LocalVolumeStore {
    fn worker_name(&self) -> &str {
        &self.worker
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> HangarResult<WorkerVolume> {
        let dir = self.volume_dir(&spec.handle)?;
        fs::create_dir_all(dir.join(CONTENT_DIR))
            .await
            .map_err(|e| HangarError::io(format!("creating volume {}", spec.handle), e))?;

        let meta = VolumeMeta {
            spec: spec.clone(),
            created_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&meta)?;
        fs::write(dir.join(SPEC_FILE), content)
            .await
            .map_err(|e| HangarError::io(format!("writing spec for volume {}", spec.handle), e))?;

        debug!(worker = %self.worker, handle = %spec.handle, "created volume");
        Ok(WorkerVolume {
            handle: spec.handle.clone(),
            worker: self.worker.clone(),
            path: dir,
        })
    }

    async fn lookup_volume(&self, handle: &str) -> HangarResult<Option<WorkerVolume>> {
        match self.require_volume(handle).await {
            Ok(path) => Ok(Some(WorkerVolume {
                handle: handle.to_string(),
                worker: self.worker.clone(),
                path,
            })),
            Err(HangarError::VolumeNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn initialize_artifact(&self, handle: &str, path: &str, checksum: &str) -> HangarResult<()> {
        let dir = self.require_volume(handle).await?;
        let content_dir = self.content_dir(handle, path)?;
        fs::create_dir_all(&content_dir)
            .await
            .map_err(|e| HangarError::io(format!("preparing {} in volume {}", path, handle), e))?;

        let meta = ArtifactMeta {
            path: path.to_string(),
            checksum: checksum.to_string(),
        };
        fs::write(dir.join(ARTIFACT_FILE), serde_json::to_string_pretty(&meta)?)
            .await
            .map_err(|e| HangarError::io(format!("initializing artifact in volume {}", handle), e))?;
        Ok(())
    }

    async fn stream_in(&self, handle: &str, path: &str, mut data: ByteStream) -> HangarResult<u64> {
        self.require_volume(handle).await?;
        let content_dir = self.content_dir(handle, path)?;
        fs::create_dir_all(&content_dir)
            .await
            .map_err(|e| HangarError::io(format!("preparing {} in volume {}", path, handle), e))?;

        let target = content_dir.join(STREAM_FILE);
        let mut partial = PartialFile::new(content_dir.join(format!(
            "{}.partial-{}",
            STREAM_FILE,
            Uuid::new_v4()
        )));

        let mut file = fs::File::create(&partial.path)
            .await
            .map_err(|e| HangarError::io(format!("opening stream into volume {}", handle), e))?;

        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk =
                chunk.map_err(|e| HangarError::io(format!("reading stream for volume {}", handle), e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| HangarError::io(format!("writing stream into volume {}", handle), e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| HangarError::io(format!("flushing stream into volume {}", handle), e))?;
        drop(file);

        fs::rename(&partial.path, &target)
            .await
            .map_err(|e| HangarError::io(format!("committing stream into volume {}", handle), e))?;
        partial.disarm();

        debug!(worker = %self.worker, handle, path, bytes = written, "streamed in");
        Ok(written)
    }

    async fn stream_out(&self, handle: &str, path: &str) -> HangarResult<ByteStream> {
        self.require_volume(handle).await?;
        let source = self.content_dir(handle, path)?.join(STREAM_FILE);

        let file = fs::File::open(&source).await.map_err(|e| {
            HangarError::io(format!("opening {} in volume {}", path, handle), e)
        })?;

        Ok(Box::pin(futures_util::stream::try_unfold(file, read_chunk)))
    }

    async fn destroy_volume(&self, handle: &str) -> HangarResult<()> {
        let dir = self.volume_dir(handle)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(worker = %self.worker, handle, "destroyed volume");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HangarError::io(format!("destroying volume {}", handle), e)),
        }
    }
}
