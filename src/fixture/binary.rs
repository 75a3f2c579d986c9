//! Raw weight encoding: little-endian f32, row-major, no header

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{HarnessError, Result};

/// Dump `values` as raw little-endian f32, creating parent directories
pub fn write_binary<P: AsRef<Path>>(values: &[f32], path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
    }

    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, &bytes).map_err(|e| HarnessError::io(path, e))?;

    debug!("Wrote {} f32 values ({} bytes) to {:?}", values.len(), bytes.len(), path);
    Ok(())
}

/// Load raw little-endian f32 values
pub fn read_binary<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(HarnessError::MissingFixture {
            path: path.to_path_buf(),
        });
    }

    let bytes = fs::read(path).map_err(|e| HarnessError::FixtureLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if bytes.len() % 4 != 0 {
        return Err(HarnessError::FixtureLoad {
            path: path.to_path_buf(),
            reason: format!("{} bytes is not a whole number of f32 values", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
