//! Filesystem capability
//!
//! Every component takes the capability as an explicit trait object rather
//! than reaching for ambient globals, so recency updates and scans can be
//! tested against an in-memory double and pointed at any rooted namespace.

use crate::error::{MonitorError, Result};
use crate::types::FileMeta;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::task::JoinError;

/// Narrow filesystem interface scoped to a root namespace.
///
/// Implementations must be safe for concurrent callers: recency updates
/// from the tracker can race with scans from the monitor loop.
#[async_trait]
pub trait CacheFs: Send + Sync {
    /// Metadata for one key; `MonitorError::NotFound` if absent.
    async fn stat(&self, key: &str) -> Result<FileMeta>;

    /// Create a new zero-length object; `MonitorError::AlreadyExists` if
    /// the key is already taken.
    async fn create(&self, key: &str) -> Result<()>;

    /// Set the modification time of an existing object.
    async fn set_mtime(&self, key: &str, when: DateTime<Utc>) -> Result<()>;

    /// Remove an object. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Every regular file under the root, in lexicographic key order.
    async fn walk(&self) -> Result<Vec<FileMeta>>;
}

/// Production capability rooted at a directory.
///
/// Blocking `std::fs` work runs on the blocking thread pool. Keys resolve
/// strictly under the root; absolute keys and keys containing `..` are
/// rejected rather than resolved.
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(MonitorError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl CacheFs for DirFs {
    async fn stat(&self, key: &str) -> Result<FileMeta> {
        let path = self.resolve(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let md = std::fs::metadata(&path).map_err(|err| io_err(&key, err))?;
            if !md.is_file() {
                return Err(MonitorError::NotFound(key));
            }
            let modified = md.modified()?;
            Ok(FileMeta {
                key,
                size: md.len(),
                modified: modified.into(),
            })
        })
        .await
        .map_err(join_err)?
    }

    async fn create(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| io_err(&key, err))?;
            }
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map(drop)
                .map_err(|err| io_err(&key, err))
        })
        .await
        .map_err(join_err)?
    }

    async fn set_mtime(&self, key: &str, when: DateTime<Utc>) -> Result<()> {
        let path = self.resolve(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(|err| io_err(&key, err))?;
            let times = std::fs::FileTimes::new().set_modified(SystemTime::from(when));
            file.set_times(times).map_err(|err| io_err(&key, err))
        })
        .await
        .map_err(join_err)?
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&key, err)),
        })
        .await
        .map_err(join_err)?
    }

    async fn walk(&self) -> Result<Vec<FileMeta>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_dir(&root))
            .await
            .map_err(join_err)?
    }
}

fn io_err(key: &str, err: io::Error) -> MonitorError {
    match err.kind() {
        io::ErrorKind::NotFound => MonitorError::NotFound(key.to_string()),
        io::ErrorKind::AlreadyExists => MonitorError::AlreadyExists(key.to_string()),
        _ => MonitorError::Io(err),
    }
}

fn join_err(err: JoinError) -> MonitorError {
    MonitorError::Io(io::Error::new(io::ErrorKind::Other, err))
}

fn walk_dir(root: &Path) -> Result<Vec<FileMeta>> {
    let walk_fail = |path: &Path, err: io::Error| {
        MonitorError::Walk(format!("{}: {}", path.display(), err))
    };

    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|err| walk_fail(&dir, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| walk_fail(&dir, err))?;
            let path = entry.path();
            let md = entry.metadata().map_err(|err| walk_fail(&path, err))?;
            if md.is_dir() {
                pending.push(path);
                continue;
            }
            if !md.is_file() {
                // Symlinks and other special files are not cache entries.
                continue;
            }
            let key = match path.strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            let modified = md.modified().map_err(|err| walk_fail(&path, err))?;
            out.push(FileMeta {
                key,
                size: md.len(),
                modified: modified.into(),
            });
        }
    }
    out.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(out)
}

#[cfg(test)]
pub(crate) use mem::MemFs;
