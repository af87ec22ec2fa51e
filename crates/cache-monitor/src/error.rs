//! Error types for the cache monitor

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum MonitorError {
    /// A genuine filesystem fault.
    Io(io::Error),
    /// The key does not exist in the root namespace.
    NotFound(String),
    /// The key already exists (create lost a race).
    AlreadyExists(String),
    /// Recursive enumeration of the root failed; fatal to the scan loop.
    Walk(String),
    /// The key is absolute or escapes the root namespace.
    InvalidKey(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Io(err) => write!(f, "I/O error: {}", err),
            MonitorError::NotFound(key) => write!(f, "not found: {}", key),
            MonitorError::AlreadyExists(key) => write!(f, "already exists: {}", key),
            MonitorError::Walk(msg) => write!(f, "walk error: {}", msg),
            MonitorError::InvalidKey(key) => write!(f, "invalid key: {}", key),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MonitorError {
    fn from(err: io::Error) -> Self {
        MonitorError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
