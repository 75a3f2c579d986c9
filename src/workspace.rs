//! Per-scenario scratch directories
//!
//! Concurrent scenarios must use distinct names; there is no locking.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{HarnessError, Result};

/// Ensure `path` exists as a directory; succeeds if it already does
pub fn acquire<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    fs::create_dir_all(path).map_err(|e| HarnessError::io(path, e))?;
    Ok(path.to_path_buf())
}

/// Delete `path` recursively unless `retain` is set
///
/// Returns the path when it was kept for inspection.
pub fn release<P: AsRef<Path>>(path: P, retain: bool) -> Result<Option<PathBuf>> {
    let path = path.as_ref();
    if retain {
        info!("Temporary folder {:?} retained for inspection.", path);
        return Ok(Some(path.to_path_buf()));
    }
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| HarnessError::io(path, e))?;
    }
    info!("Temporary folder {:?} deleted.", path);
    Ok(None)
}

/// Scoped scratch directory, released on drop if not released explicitly
pub struct Workspace {
    path: PathBuf,
    retain: bool,
    released: bool,
}

impl Workspace {
    /// Acquire `root/name`
    pub fn acquire<P: AsRef<Path>>(root: P, name: &str, retain: bool) -> Result<Self> {
        let path = acquire(root.as_ref().join(name))?;
        info!("Using temporary folder: {:?}", path);
        Ok(Self {
            path,
            retain,
            released: false,
        })
    }

    /// Directory owned by this workspace
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a fixture inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Whether the directory survives release
    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Release now, surfacing any deletion error
    pub fn release(mut self) -> Result<Option<PathBuf>> {
        self.released = true;
        release(&self.path, self.retain)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release(&self.path, self.retain) {
            warn!("Failed to release workspace {:?}: {}", self.path, e);
        }
    }
}
