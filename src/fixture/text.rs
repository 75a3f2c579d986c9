//! Text fixture encoding: one value per line, row-major, 6 fractional digits
//! (weights use the shortest exact form instead)
//!
//! Shapes are never stored in the file; readers supply them out of band.

use std::fmt::Display;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use super::tensor::FlatTensor;
use crate::error::{HarnessError, Result};

/// Write `tensor` as one `{:.6}` value per line, creating parent directories
pub fn write_text<P: AsRef<Path>>(tensor: &FlatTensor, path: P) -> Result<()> {
    write_values(tensor, path.as_ref(), |w, v| writeln!(w, "{:.6}", v))
}

/// Write `tensor` with the shortest representation that parses back to the
/// same f32, for weights the candidate must see bit-for-bit
pub fn write_text_exact<P: AsRef<Path>>(tensor: &FlatTensor, path: P) -> Result<()> {
    write_values(tensor, path.as_ref(), |w, v| writeln!(w, "{}", v))
}

fn write_values<F>(tensor: &FlatTensor, path: &Path, mut line: F) -> Result<()>
where
    F: FnMut(&mut BufWriter<fs::File>, f32) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
    }

    let file = fs::File::create(path).map_err(|e| HarnessError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for &value in tensor.data() {
        line(&mut writer, value).map_err(|e| HarnessError::io(path, e))?;
    }
    writer.flush().map_err(|e| HarnessError::io(path, e))?;

    debug!(
        "Wrote {} values (shape {:?}) to {:?}",
        tensor.numel(),
        tensor.shape(),
        path
    );
    Ok(())
}

/// Read whitespace-separated f32 values without reshaping
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    read_text_as(path)
}

/// Read whitespace-separated values parsed as `T`
///
/// The error analyzer reads at f64 so comparisons see the written decimals.
pub fn read_text_as<T, P>(path: P) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(HarnessError::MissingFixture {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| HarnessError::FixtureLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    content
        .split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            token.parse::<T>().map_err(|e| HarnessError::FixtureLoad {
                path: path.to_path_buf(),
                reason: format!("value #{} '{}': {}", i, token, e),
            })
        })
        .collect()
}

/// Read a text fixture and validate it against `shape`
pub fn read_text_shaped<P: AsRef<Path>>(path: P, shape: &[usize]) -> Result<FlatTensor> {
    let path = path.as_ref();
    let data = read_text(path)?;
    let expected: usize = shape.iter().product();
    if data.len() != expected {
        return Err(HarnessError::ShapeMismatch {
            context: path.display().to_string(),
            expected: shape.to_vec(),
            actual: data.len(),
        });
    }
    FlatTensor::new(shape.to_vec(), data)
}
