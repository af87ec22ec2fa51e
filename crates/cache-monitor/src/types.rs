//! Monitor value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One regular file as reported by the filesystem capability.
///
/// Keys are `/`-separated paths relative to the monitored root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A cache entry selected for eviction, delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionCandidate {
    pub key: String,
}
