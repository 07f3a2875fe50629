//! Error types for tiled volume operations

use crate::types::GridIndex;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for volume store operations
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO failure on tile file {}: {source}", .path.display())]
    TileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Not aligned: {0}")]
    NotAligned(String),

    #[error("Probe outside of volume: {0}")]
    EmptyProbe(String),

    #[error("{} tile job(s) failed, first: {}", .0.len(), .0.first().map(|f| f.to_string()).unwrap_or_default())]
    TileJobs(Vec<TileFailure>),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VolumeError {
    pub(crate) fn tile_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VolumeError::TileIo {
            path: path.into(),
            source,
        }
    }

    /// True when the underlying cause is a missing file
    pub fn is_not_found(&self) -> bool {
        match self {
            VolumeError::Io(e) | VolumeError::TileIo { source: e, .. } => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Specialized Result type for volume store operations
pub type Result<T> = std::result::Result<T, VolumeError>;

/// One tile job that failed during a fan-out
#[derive(Debug)]
pub struct TileFailure {
    pub index: GridIndex,
    pub path: PathBuf,
    pub error: VolumeError,
}

impl fmt::Display for TileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {} ({}): {}", self.index, self.path.display(), self.error)
    }
}

impl From<serde_json::Error> for VolumeError {
    fn from(err: serde_json::Error) -> Self {
        VolumeError::Serialization(err.to_string())
    }
}
