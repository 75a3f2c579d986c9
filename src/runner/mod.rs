//! Execution of the reference and candidate implementations
//!
//! Both runners consume a text input fixture and leave a text output
//! fixture behind for the analyzer.

mod candidate;
mod invocation;
mod reference;

pub use candidate::CandidateRunner;
pub use invocation::Invocation;
pub use reference::ReferenceRunner;

use std::time::Duration;

use crate::fixture::FlatTensor;

/// Wall-clock timing over one or more identical calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Latency {
    /// Number of timed calls
    pub iterations: u32,
    /// Time spent across all calls
    pub total: Duration,
}

impl Latency {
    /// Mean time per call
    pub fn mean(&self) -> Duration {
        if self.iterations == 0 {
            return Duration::ZERO;
        }
        self.total / self.iterations
    }

    /// Mean time per call in microseconds
    pub fn mean_micros(&self) -> f64 {
        self.mean().as_secs_f64() * 1e6
    }
}

/// Output of one runner invocation
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Output tensor as written to the output fixture
    pub output: FlatTensor,
    /// Timing of the forward computation
    pub latency: Option<Latency>,
    /// Process exit code; `None` for in-process runs
    pub exit_code: Option<i32>,
}
