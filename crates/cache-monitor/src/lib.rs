//! Directory-backed cache monitoring with LRU eviction streaming
//!
//! This crate is a companion to a content store it does not own: callers
//! read and write cached payloads elsewhere and only notify the monitor of
//! touch events (put/get) and deletions. Recency is tracked through
//! zero-length `.mon` sidecar markers whose modification time is the
//! authoritative last-touched signal, independent of the payload's own
//! mtime. A background loop periodically re-measures the total payload
//! size under the root and streams least-recently-touched eviction
//! candidates to the consumer as a backpressured, cancellable sequence.
//!
//! The monitor never deletes payloads itself; the consumer pulls
//! candidates via [`Evictions`] and performs the actual removal.

mod cache;
mod error;
mod fs;
mod monitor;
mod scan;
mod types;

pub use cache::{Cache, MON_SUFFIX};
pub use error::{MonitorError, Result};
pub use fs::{CacheFs, DirFs};
pub use monitor::{run_background, start, start_with_fs, Evictions, MonitorConfig, Shutdown};
pub use types::{EvictionCandidate, FileMeta};
