//! Flat host tensor with a checked shape

use std::path::PathBuf;

use crate::error::{HarnessError, Result};

/// Row-major f32 tensor whose element count always matches its shape
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl FlatTensor {
    /// Build a tensor, rejecting data whose length disagrees with `shape`
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(HarnessError::ShapeMismatch {
                context: "tensor construction".to_string(),
                expected: shape,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Build a tensor whose length is known to match by construction
    pub(crate) fn new_unchecked(shape: Vec<usize>, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), shape.iter().product::<usize>());
        Self { shape, data }
    }

    /// Shape, outermost dimension first
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume into the flat values
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shape as comma-separated dimensions, e.g. "1,2560"
    pub fn shape_csv(&self) -> String {
        shape_csv(&self.shape)
    }

    /// First and last `n` values, for log previews
    pub fn preview(&self, n: usize) -> (&[f32], &[f32]) {
        let n = n.min(self.data.len());
        (&self.data[..n], &self.data[self.data.len() - n..])
    }
}

pub(crate) fn shape_csv(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-separated shape such as "2,256,8"
pub fn parse_shape(csv: &str) -> Result<Vec<usize>> {
    let invalid = |reason: String| HarnessError::Config {
        path: PathBuf::from(csv),
        reason,
    };

    let shape = csv
        .split(',')
        .map(|dim| {
            let dim = dim.trim();
            match dim.parse::<usize>() {
                Ok(0) => Err(invalid("dimensions must be positive".to_string())),
                Ok(d) => Ok(d),
                Err(e) => Err(invalid(format!("invalid dimension '{}': {}", dim, e))),
            }
        })
        .collect::<Result<Vec<usize>>>()?;

    if shape.is_empty() {
        return Err(invalid("empty shape".to_string()));
    }
    Ok(shape)
}
