//! In-process reference execution with latency sampling

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{Latency, RunResult};
use crate::error::Result;
use crate::fixture::{read_text_shaped, write_text};
use crate::models::ReferenceModel;
use crate::REFERENCE_ITERATIONS;

/// Runs a [`ReferenceModel`] over a text fixture
pub struct ReferenceRunner {
    iterations: u32,
}

impl Default for ReferenceRunner {
    fn default() -> Self {
        Self {
            iterations: REFERENCE_ITERATIONS,
        }
    }
}

impl ReferenceRunner {
    /// Runner with the standard repetition count
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `input_path` (reshaped to `shape`) through `model` and write
    /// the last output to `output_path`
    ///
    /// No warm-up: every one of the iterations is timed.
    pub fn run<M: ReferenceModel + ?Sized>(
        &self,
        model: &M,
        input_path: &Path,
        shape: &[usize],
        output_path: &Path,
    ) -> Result<RunResult> {
        let input = read_text_shaped(input_path, shape)?;

        let mut total = Duration::ZERO;
        let mut output = None;
        for _ in 0..self.iterations {
            let start = Instant::now();
            let result = model.forward(&input)?;
            total += start.elapsed();
            output = Some(result);
        }
        let output = match output {
            Some(output) => output,
            None => model.forward(&input)?,
        };

        let latency = Latency {
            iterations: self.iterations,
            total,
        };
        info!(
            "Reference {} execution time: {:.2} µs over {} runs",
            model.name(),
            latency.mean_micros(),
            self.iterations
        );

        write_text(&output, output_path)?;
        let (head, tail) = output.preview(10);
        debug!("Output (first 10 elements): {:?}", head);
        debug!("Output (last 10 elements): {:?}", tail);
        info!("Reference output saved to {:?}", output_path);

        Ok(RunResult {
            output,
            latency: Some(latency),
            exit_code: None,
        })
    }
}
