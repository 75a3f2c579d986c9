//! Error taxonomy for the conformance harness
//!
//! Every variant is fatal for the scenario that raised it and non-fatal for
//! the process: a multi-scenario run reports it and moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing, running or comparing a scenario
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A fixture that should exist is absent
    #[error("fixture not found: {path:?}")]
    MissingFixture {
        /// Path that was expected to exist
        path: PathBuf,
    },

    /// Element count disagrees with the declared or expected shape
    #[error("shape mismatch in {context}: got {actual} elements, expected shape {expected:?} ({} elements)", .expected.iter().product::<usize>())]
    ShapeMismatch {
        /// Where the mismatch was detected (a path or a comparison label)
        context: String,
        /// Declared or expected shape
        expected: Vec<usize>,
        /// Element count actually found
        actual: usize,
    },

    /// A fixture exists but could not be read or parsed
    #[error("failed to load fixture {path:?}: {reason}")]
    FixtureLoad {
        /// Offending fixture
        path: PathBuf,
        /// Parser or reader message
        reason: String,
    },

    /// The candidate executable does not exist
    #[error("candidate executable not found: {path:?}")]
    CandidateMissing {
        /// Declared executable path
        path: PathBuf,
    },

    /// The candidate ran but exited unsuccessfully
    #[error("candidate exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    CandidateProcess {
        /// Exit code, `None` when terminated by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The candidate did not finish within the configured bound
    #[error("candidate killed after {timeout:?} timeout (stderr: {stderr})")]
    CandidateTimeout {
        /// Bound that expired
        timeout: std::time::Duration,
        /// Standard error captured before the kill
        stderr: String,
    },

    /// Filesystem or process I/O failure
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or argument value
    #[error("invalid configuration {path:?}: {reason}")]
    Config {
        /// Config file, or the offending argument
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// Failure inside the reference tensor framework
    #[error(transparent)]
    Reference(#[from] candle_core::Error),
}

impl HarnessError {
    /// Wrap an I/O error with the path that produced it
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_names_both_sizes() {
        let err = HarnessError::ShapeMismatch {
            context: "input.txt".to_string(),
            expected: vec![2, 3],
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("5 elements"));
        assert!(msg.contains("[2, 3]"));
        assert!(msg.contains("6 elements"));
    }

    #[test]
    fn test_candidate_process_carries_stderr() {
        let err = HarnessError::CandidateProcess {
            code: Some(3),
            stderr: "bad weight file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("status 3"));
        assert!(msg.contains("bad weight file"));
    }
}
