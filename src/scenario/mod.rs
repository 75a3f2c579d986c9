//! Per-sublayer conformance scenarios
//!
//! A scenario generates one input, runs the reference, releases the
//! reference weights, runs the candidate and compares both outputs.

mod driver;

pub use driver::{ScenarioDriver, ScenarioOutcome};

use crate::config::HarnessConfig;
use crate::error::Result;

/// Sublayer under test
#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    /// Final RMS normalization
    Norm {
        /// Input shape; `None` means `(1, hidden)`
        shape: Option<Vec<usize>>,
        /// Overrides the checkpoint's epsilon
        epsilon: Option<f64>,
    },
    /// `gate_proj` of one decoder layer
    GateProjection {
        /// Decoder layer
        layer_index: usize,
    },
    /// Full gated MLP of one decoder layer
    Mlp {
        /// Decoder layer
        layer_index: usize,
        /// Candidate memory-maps the checkpoint
        use_mmap: bool,
        /// Candidate issues prefetch advice
        use_prefetch: bool,
    },
}

impl Scenario {
    /// Norm scenario as configured
    pub fn norm(config: &HarnessConfig) -> Result<Self> {
        Ok(Scenario::Norm {
            shape: config.norm_shape()?,
            epsilon: config.norm.epsilon,
        })
    }

    /// Gate projection scenario as configured
    pub fn gate(config: &HarnessConfig) -> Self {
        Scenario::GateProjection {
            layer_index: config.layer_index,
        }
    }

    /// MLP scenario as configured
    pub fn mlp(config: &HarnessConfig) -> Self {
        Scenario::Mlp {
            layer_index: config.layer_index,
            use_mmap: config.use_mmap,
            use_prefetch: config.use_prefetch,
        }
    }

    /// Every scenario, in norm, gate, MLP order
    pub fn all(config: &HarnessConfig) -> Result<Vec<Self>> {
        Ok(vec![Self::norm(config)?, Self::gate(config), Self::mlp(config)])
    }

    /// Display name
    pub fn name(&self) -> String {
        match self {
            Scenario::Norm { .. } => "Qwen3RMSNorm".to_string(),
            Scenario::GateProjection { layer_index } => format!("Qwen3MLPGate[layer {}]", layer_index),
            Scenario::Mlp { layer_index, .. } => format!("Qwen3MLP[layer {}]", layer_index),
        }
    }

    /// Workspace directory name, distinct per scenario
    pub fn workspace_name(&self) -> String {
        match self {
            Scenario::Norm { .. } => "norm".to_string(),
            Scenario::GateProjection { layer_index } => format!("gate_proj_l{}", layer_index),
            Scenario::Mlp { layer_index, .. } => format!("mlp_l{}", layer_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_workspace_names_are_distinct() {
        let config = HarnessConfig::default();
        let names: HashSet<String> = Scenario::all(&config)
            .unwrap()
            .iter()
            .map(Scenario::workspace_name)
            .collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_from_config() {
        let mut config = HarnessConfig::default();
        config.layer_index = 5;
        config.use_prefetch = true;
        config.norm.shape = Some("2,8".to_string());

        assert_eq!(
            Scenario::norm(&config).unwrap(),
            Scenario::Norm {
                shape: Some(vec![2, 8]),
                epsilon: None
            }
        );
        assert_eq!(Scenario::gate(&config).workspace_name(), "gate_proj_l5");
        assert_eq!(
            Scenario::mlp(&config),
            Scenario::Mlp {
                layer_index: 5,
                use_mmap: false,
                use_prefetch: true
            }
        );
    }
}
