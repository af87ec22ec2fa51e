//! Snapshot rebuild and eviction selection
//!
//! Each scan cycle rebuilds the full picture from the filesystem; nothing
//! is carried over between cycles, so a restart loses no state.

use crate::cache::MON_SUFFIX;
use crate::error::Result;
use crate::fs::CacheFs;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One tracked payload in a point-in-time snapshot.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub key: String,
    pub size: u64,
    pub last_touched: DateTime<Utc>,
}

/// Walk the root and pair every payload file with its recency marker.
///
/// Marker files themselves are skipped, and payloads without a marker are
/// not tracked. Entries come back in walk (lexicographic) order, which is
/// the stable tie-break for equal timestamps. Directories never appear;
/// the capability only reports regular files.
pub(crate) async fn build_snapshot(fs: &dyn CacheFs) -> Result<Vec<Entry>> {
    let files = fs.walk().await?;

    let mut marker_mtimes: HashMap<String, DateTime<Utc>> = HashMap::new();
    for meta in &files {
        if let Some(payload_key) = meta.key.strip_suffix(MON_SUFFIX) {
            marker_mtimes.insert(payload_key.to_string(), meta.modified);
        }
    }

    let mut entries = Vec::new();
    for meta in files {
        if meta.key.ends_with(MON_SUFFIX) {
            continue;
        }
        if let Some(&last_touched) = marker_mtimes.get(meta.key.as_str()) {
            entries.push(Entry {
                key: meta.key,
                size: meta.size,
                last_touched,
            });
        }
    }
    Ok(entries)
}

/// Greedy oldest-first prefix whose removal brings the total at or below
/// the budget.
///
/// Returns an empty vec when the snapshot already fits. The prefix stops at
/// the first entry that gets the running total under budget, so the result
/// may undershoot the exact budget by less than one further entry's size;
/// no exact-fit subset search is attempted.
pub(crate) fn select_evictions(mut entries: Vec<Entry>, max_size_bytes: u64) -> Vec<Entry> {
    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    if total <= max_size_bytes {
        return Vec::new();
    }

    // Stable sort keeps enumeration order for equal timestamps.
    entries.sort_by_key(|e| e.last_touched);

    let mut cut = entries.len();
    for (i, entry) in entries.iter().enumerate() {
        total -= entry.size;
        if total <= max_size_bytes {
            cut = i + 1;
            break;
        }
    }
    entries.truncate(cut);
    entries
}
