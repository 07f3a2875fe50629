//! Round-robin assignment of tiles to storage directories

use crate::error::{Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ordered, non-empty list of storage locations.
///
/// Duplicates are allowed: listing a mount twice gives it twice the share of
/// tiles. Assignment depends only on the linear tile index and the order of
/// the list, so reordering the list moves tiles between directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PathBuf>", into = "Vec<PathBuf>")]
pub struct DirectoryRing {
    dirs: Vec<PathBuf>,
}

impl DirectoryRing {
    pub fn new<I, P>(dirs: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let dirs: Vec<PathBuf> = dirs.into_iter().map(Into::into).collect();
        if dirs.is_empty() {
            return Err(VolumeError::InvalidConfig(
                "directory list is empty".to_string(),
            ));
        }
        if let Some(empty) = dirs.iter().position(|d| d.as_os_str().is_empty()) {
            return Err(VolumeError::InvalidConfig(format!(
                "directory #{} is an empty path",
                empty
            )));
        }
        Ok(Self { dirs })
    }

    /// Directory that holds the tile with this linear index
    pub fn assign(&self, linear_index: usize) -> &Path {
        &self.dirs[linear_index % self.dirs.len()]
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    /// Each distinct directory once, in first-seen order
    pub fn distinct(&self) -> Vec<&Path> {
        let mut seen: Vec<&Path> = Vec::with_capacity(self.dirs.len());
        for dir in self.iter() {
            if !seen.contains(&dir) {
                seen.push(dir);
            }
        }
        seen
    }
}

impl TryFrom<Vec<PathBuf>> for DirectoryRing {
    type Error = VolumeError;

    fn try_from(dirs: Vec<PathBuf>) -> Result<Self> {
        Self::new(dirs)
    }
}

impl From<DirectoryRing> for Vec<PathBuf> {
    fn from(ring: DirectoryRing) -> Self {
        ring.dirs
    }
}
