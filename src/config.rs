//! Harness configuration (YAML)
//!
//! Every field has a default, so a config file only needs the overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::Tolerance;
use crate::error::{HarnessError, Result};
use crate::fixture::parse_shape;

/// Top-level harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Reference checkpoint: a .safetensors file or a directory of shards
    pub model_path: PathBuf,
    /// Checkpoint handed to the MLP candidate; defaults to `model_path`
    pub weights_source: Option<PathBuf>,
    /// Parent of every scenario workspace
    pub workspace_root: PathBuf,
    /// Keep workspaces after each scenario
    pub retain: bool,
    /// Seed for generated inputs
    pub seed: u64,
    /// Bound on each candidate process
    pub candidate_timeout_secs: u64,
    /// Decoder layer for the gate and MLP scenarios
    pub layer_index: usize,
    /// MLP candidate: memory-map the checkpoint
    pub use_mmap: bool,
    /// MLP candidate: prefetch advice on the mapping
    pub use_prefetch: bool,
    /// Candidate executables
    pub candidates: CandidateConfig,
    /// Normalization scenario parameters
    pub norm: NormConfig,
    /// Acceptance bounds per sublayer
    pub tolerances: ToleranceConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("checkpoints/Qwen3-4B"),
            weights_source: None,
            workspace_root: PathBuf::from("temp_test_folder"),
            retain: false,
            seed: crate::DEFAULT_SEED,
            candidate_timeout_secs: 600,
            layer_index: 0,
            use_mmap: false,
            use_prefetch: false,
            candidates: CandidateConfig::default(),
            norm: NormConfig::default(),
            tolerances: ToleranceConfig::default(),
        }
    }
}

/// Paths of the candidate executables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    /// RMSNorm candidate
    pub norm: PathBuf,
    /// Gate projection candidate
    pub gate: PathBuf,
    /// Full MLP candidate
    pub mlp: PathBuf,
    /// Optional argv prefix, e.g. `["python3"]` for a script candidate
    pub launcher: Vec<String>,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            norm: PathBuf::from("build/run_Qwen3RMSNorm"),
            gate: PathBuf::from("build/run_Qwen3MLPGate"),
            mlp: PathBuf::from("build/run_Qwen3MLP"),
            launcher: Vec::new(),
        }
    }
}

/// RMSNorm scenario parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormConfig {
    /// Input shape as CSV; defaults to `1,<hidden>`
    pub shape: Option<String>,
    /// Overrides the checkpoint's `rms_norm_eps`
    pub epsilon: Option<f64>,
}

/// Acceptance bounds per sublayer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// RMSNorm bounds
    pub norm: Tolerance,
    /// Gate projection bounds
    pub gate: Tolerance,
    /// Full MLP bounds
    pub mlp: Tolerance,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            norm: Tolerance::norm(),
            gate: Tolerance::projection(),
            mlp: Tolerance::mlp(),
        }
    }
}

impl HarnessConfig {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            HarnessError::Config { reason, .. } => HarnessError::Config {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| HarnessError::Config {
            path: PathBuf::from("<yaml>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no scenario could run with
    pub fn validate(&self) -> Result<()> {
        if self.candidate_timeout_secs == 0 {
            return Err(HarnessError::Config {
                path: PathBuf::from("candidate_timeout_secs"),
                reason: "timeout must be positive".to_string(),
            });
        }
        if let Some(eps) = self.norm.epsilon {
            if !(eps.is_finite() && eps >= 0.0) {
                return Err(HarnessError::Config {
                    path: PathBuf::from("norm.epsilon"),
                    reason: format!("epsilon must be finite and non-negative, got {}", eps),
                });
            }
        }
        self.norm_shape()?;
        Ok(())
    }

    /// Parsed `norm.shape`, if set
    pub fn norm_shape(&self) -> Result<Option<Vec<usize>>> {
        self.norm.shape.as_deref().map(parse_shape).transpose()
    }

    /// Wait bound for candidate processes
    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_secs(self.candidate_timeout_secs)
    }

    /// Checkpoint path given to the MLP candidate
    pub fn weights_source(&self) -> &Path {
        self.weights_source.as_deref().unwrap_or(&self.model_path)
    }
}
