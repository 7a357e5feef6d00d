//! Error types for Hangar
//!
//! All modules use `HangarResult<T>` as their return type. Only the
//! outermost request handler turns an error into an externally visible
//! status, via [`HangarError::status_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Hangar operations
pub type HangarResult<T> = Result<T, HangarError>;

/// All errors that can occur in Hangar
#[derive(Error, Debug)]
pub enum HangarError {
    // Lookup errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(i64),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Resource cache not found: {0}")]
    ResourceCacheNotFound(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    // Placement errors
    #[error("Worker {worker} unavailable: {reason}")]
    WorkerUnavailable { worker: String, reason: String },

    #[error("No eligible worker for tags [{tags}] and team {team}")]
    NoEligibleWorker { tags: String, team: String },

    // Operation errors
    #[error("Fetch failed on worker {worker}: {reason}")]
    Fetch { worker: String, reason: String },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: String, reason: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HangarError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a worker unavailable error
    pub fn unavailable(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WorkerUnavailable {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    ///
    /// Only transient worker failures qualify; everything else needs an
    /// external state change before a retry could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkerUnavailable { .. })
    }

    /// Whether this error reports an absent row, volume or worker
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound(_)
                | Self::VolumeNotFound(_)
                | Self::ResourceCacheNotFound(_)
                | Self::WorkerNotFound(_)
        )
    }

    /// HTTP status equivalent of this error
    pub fn status_code(&self) -> u16 {
        if self.is_not_found() {
            404
        } else {
            500
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoEligibleWorker { .. } => {
                Some("Check worker tags and team ownership in the [[workers]] config")
            }
            Self::ConfigInvalid { .. } => Some("Run: hangar config show"),
            Self::InvariantViolation(_) => Some("This is a bug; please report it"),
            _ => None,
        }
    }
}
