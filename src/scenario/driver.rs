//! Scenario orchestration
//!
//! Stages run strictly in sequence; each consumes the previous one's files.

use std::path::PathBuf;

use indicatif::ProgressBar;
use tracing::{debug, error, info};

use super::Scenario;
use crate::analysis::{analyze, ErrorReport, Tolerance, Verdict};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::fixture::{write_binary, write_text_exact, FixtureGenerator};
use crate::models::{Qwen3Checkpoint, ReferenceModel};
use crate::runner::{CandidateRunner, Invocation, Latency, ReferenceRunner, RunResult};
use crate::workspace::Workspace;

const INPUT_FILE: &str = "input.txt";
const NORM_WEIGHT_FILE: &str = "weight.txt";
const GATE_WEIGHT_FILE: &str = "gate_proj_weight.bin";
const REFERENCE_OUTPUT_FILE: &str = "out_reference.txt";
const CANDIDATE_OUTPUT_FILE: &str = "out_candidate.txt";

/// Result of a completed scenario
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    /// Scenario display name
    pub name: String,
    /// Divergence between the two outputs
    pub report: ErrorReport,
    /// Judgement under the scenario's tolerance
    pub verdict: Verdict,
    /// Mean reference latency
    pub reference_latency: Option<Latency>,
    /// Candidate wall time
    pub candidate_latency: Option<Latency>,
    /// Workspace path when retained
    pub retained_at: Option<PathBuf>,
}

impl ScenarioOutcome {
    /// One-line summary
    pub fn summary(&self) -> String {
        let timing = match (self.reference_latency, self.candidate_latency) {
            (Some(r), Some(c)) => format!(
                ", reference {:.2} µs/call, candidate {:.2} µs",
                r.mean_micros(),
                c.mean_micros()
            ),
            _ => String::new(),
        };
        match &self.verdict {
            Verdict::Pass => format!(
                "[PASS] {} - max_diff={:.2e}, l2={:.2e}{}",
                self.name, self.report.max_error, self.report.l2_error, timing
            ),
            Verdict::Fail(reasons) => format!("[FAIL] {} - {}{}", self.name, reasons.join("; "), timing),
        }
    }
}

/// Runs scenarios against one configuration
pub struct ScenarioDriver {
    config: HarnessConfig,
    progress: ProgressBar,
}

impl ScenarioDriver {
    /// Create a driver
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report stage changes on `progress`; reports print around it
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one scenario end to end
    ///
    /// The workspace is released on every path, honouring `retain`.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioOutcome> {
        let name = scenario.name();
        info!("=== {} ===", name);
        let workspace = Workspace::acquire(
            &self.config.workspace_root,
            &scenario.workspace_name(),
            self.config.retain,
        )?;

        // The reference model lives only inside prepare(); its weights are
        // freed before the candidate process starts
        self.progress.set_message(format!("{}: running reference", name));
        let (invocation, reference, tolerance) = self.prepare(scenario, &workspace)?;

        self.progress.set_message(format!("{}: running candidate", name));
        let candidate = self.candidate_runner(scenario).run(&invocation)?;

        self.progress.set_message(format!("{}: comparing outputs", name));
        let report = analyze(workspace.file(REFERENCE_OUTPUT_FILE), invocation.output_path())?;
        self.progress.suspend(|| println!("\n{}", report));
        let verdict = tolerance.judge(&report);

        let retained_at = workspace.release()?;
        Ok(ScenarioOutcome {
            name,
            report,
            verdict,
            reference_latency: reference.latency,
            candidate_latency: candidate.latency,
            retained_at,
        })
    }

    /// Run every scenario, continuing past failures
    pub fn run_all(&self, scenarios: &[Scenario]) -> Vec<(String, Result<ScenarioOutcome>)> {
        scenarios
            .iter()
            .map(|scenario| {
                let result = self.run(scenario);
                if let Err(e) = &result {
                    error!("{} aborted: {}", scenario.name(), e);
                }
                (scenario.name(), result)
            })
            .collect()
    }

    fn candidate_runner(&self, scenario: &Scenario) -> CandidateRunner {
        let candidates = &self.config.candidates;
        let executable = match scenario {
            Scenario::Norm { .. } => &candidates.norm,
            Scenario::GateProjection { .. } => &candidates.gate,
            Scenario::Mlp { .. } => &candidates.mlp,
        };
        CandidateRunner::new(executable, self.config.candidate_timeout())
            .with_launcher(&candidates.launcher)
    }

    fn prepare(
        &self,
        scenario: &Scenario,
        workspace: &Workspace,
    ) -> Result<(Invocation, RunResult, Tolerance)> {
        let checkpoint = Qwen3Checkpoint::open(&self.config.model_path)?;
        let mut generator = FixtureGenerator::new(self.config.seed);
        let input = workspace.file(INPUT_FILE);
        let reference_output = workspace.file(REFERENCE_OUTPUT_FILE);
        let candidate_output = workspace.file(CANDIDATE_OUTPUT_FILE);
        let runner = ReferenceRunner::new();
        let tolerances = &self.config.tolerances;

        match scenario {
            Scenario::Norm { shape, epsilon } => {
                let model = checkpoint.rms_norm(*epsilon)?;
                let hidden = model.dims().input;
                let shape = match shape {
                    Some(shape) if shape.last() == Some(&hidden) => shape.clone(),
                    Some(shape) => {
                        let mut expected = shape.clone();
                        if let Some(last) = expected.last_mut() {
                            *last = hidden;
                        }
                        return Err(HarnessError::ShapeMismatch {
                            context: format!("norm input vs hidden size {}", hidden),
                            expected,
                            actual: shape.iter().product(),
                        });
                    }
                    None => vec![1, hidden],
                };

                generator.generate_to(&shape, &input)?;
                let weight = workspace.file(NORM_WEIGHT_FILE);
                write_text_exact(&model.weight()?, &weight)?;

                let reference = runner.run(&model, &input, &shape, &reference_output)?;
                let invocation = Invocation::Norm {
                    input,
                    weight,
                    output: candidate_output,
                    shape,
                    epsilon: model.eps(),
                };
                Ok((invocation, reference, tolerances.norm))
            }

            Scenario::GateProjection { layer_index } => {
                let model = checkpoint.gate_proj(*layer_index)?;
                let dims = model.dims();
                let (n, k, m) = (1, dims.input, dims.output);

                generator.generate_to(&[n, k], &input)?;
                let reference = runner.run(&model, &input, &[n, k], &reference_output)?;

                let weight_path = workspace.file(GATE_WEIGHT_FILE);
                let weight = model.weight()?;
                write_binary(weight.data(), &weight_path)?;
                let (head, tail) = weight.preview(10);
                debug!("Weight (first 10 elements): {:?}", head);
                debug!("Weight (last 10 elements): {:?}", tail);
                info!("Gate projection weights saved to {:?}", weight_path);

                let invocation = Invocation::Projection {
                    input,
                    weight: weight_path,
                    output: candidate_output,
                    n,
                    k,
                    m,
                };
                Ok((invocation, reference, tolerances.gate))
            }

            Scenario::Mlp {
                layer_index,
                use_mmap,
                use_prefetch,
            } => {
                let model = checkpoint.mlp(*layer_index)?;
                let dims = model.dims();
                let n = 1;

                generator.generate_to(&[n, dims.input], &input)?;
                let reference = runner.run(&model, &input, &[n, dims.input], &reference_output)?;

                let invocation = Invocation::Mlp {
                    weights_source: self.config.weights_source().to_path_buf(),
                    input,
                    output: candidate_output,
                    n,
                    k_in: dims.input,
                    k_up: dims.hidden,
                    k_out: dims.output,
                    layer_index: *layer_index,
                    use_mmap: *use_mmap,
                    use_prefetch: *use_prefetch,
                };
                Ok((invocation, reference, tolerances.mlp))
            }
        }
    }
}
