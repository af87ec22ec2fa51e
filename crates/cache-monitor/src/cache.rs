//! Recency tracking over sidecar marker files
//!
//! The tracker never reads or writes payload content. Each touched key gets
//! a zero-length marker at `<key>.mon`; the marker's mtime is the logical
//! last-touched time. Keeping recency out of the payload's own mtime means
//! external writers can rewrite payload content without resetting staleness.

use crate::error::{MonitorError, Result};
use crate::fs::CacheFs;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Suffix appended to a payload key to name its recency marker.
///
/// Must match what the scan loop looks for; a key without a marker is
/// invisible to eviction accounting.
pub const MON_SUFFIX: &str = ".mon";

/// Records put/get/delete touches for cache keys.
pub struct Cache {
    fs: Arc<dyn CacheFs>,
}

impl Cache {
    pub fn new(fs: Arc<dyn CacheFs>) -> Self {
        Self { fs }
    }

    /// Record a touch for `key`, creating its marker on first use.
    pub async fn put(&self, key: &str) -> Result<()> {
        self.touch(key).await
    }

    /// Report whether the payload for `key` exists, refreshing its recency
    /// if so. An absent payload is `Ok(false)`, never an error.
    pub async fn get(&self, key: &str) -> Result<bool> {
        match self.fs.stat(key).await {
            Ok(_) => {
                self.touch(key).await?;
                Ok(true)
            }
            Err(MonitorError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Drop the recency marker for `key`. Idempotent; the payload itself is
    /// left to the caller.
    pub async fn delete(&self, key: &str) -> Result<()> {
        debug!(key = %key, "removing recency marker");
        self.fs.remove(&marker_key(key)).await
    }

    async fn touch(&self, key: &str) -> Result<()> {
        let marker = marker_key(key);
        match self.fs.set_mtime(&marker, Utc::now()).await {
            Ok(()) => Ok(()),
            Err(MonitorError::NotFound(_)) => {
                debug!(key = %key, "creating recency marker");
                match self.fs.create(&marker).await {
                    Ok(()) => Ok(()),
                    // Lost the create race to a concurrent toucher; their
                    // timestamp stands.
                    Err(MonitorError::AlreadyExists(_)) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn marker_key(key: &str) -> String {
    format!("{key}{MON_SUFFIX}")
}
