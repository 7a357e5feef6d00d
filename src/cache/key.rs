//! Content-addressed resource cache identity
//!
//! A cache is identified by the resource type, the resolved version and a
//! SHA256 digest of the source configuration that produced it. Same
//! inputs = same key = same ledger row.

use crate::error::HangarResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Resolved resource version, e.g. `{"ref": "abc123"}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(BTreeMap<String, String>);

impl ResourceVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceVersion {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Uniqueness tuple of a resource cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Resource type identifier (`git`, `time`, ...)
    pub resource_type: String,
    pub version: ResourceVersion,
    /// SHA256 of the source configuration
    pub config_digest: String,
}

impl CacheKey {
    pub fn new(
        resource_type: impl Into<String>,
        version: ResourceVersion,
        config_digest: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            version,
            config_digest: config_digest.into(),
        }
    }

    /// Stable SHA256 of the whole tuple, used as the ledger index key
    ///
    /// Hashes the JSON encoding, so field boundaries cannot blur across
    /// version keys and values.
    pub fn fingerprint(&self) -> HangarResult<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest: String = self.config_digest.chars().take(12).collect();
        write!(f, "{}:{}@{}", self.resource_type, self.version, digest)
    }
}

/// SHA256 digest of a resource's source configuration
///
/// Object keys are serialized in sorted order, so configurations that
/// differ only in key order share a digest.
pub fn config_digest(source: &serde_json::Value) -> HangarResult<String> {
    let canonical = serde_json::to_vec(source)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
