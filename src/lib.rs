//! # layercheck - Qwen3 sublayer conformance harness
//!
//! Checks an externally built implementation of individual Qwen3 sublayers
//! (final RMSNorm, MLP gate projection, full gated MLP) against a reference
//! forward pass computed with Candle on the same checkpoint weights.
//!
//! ## Flow
//!
//! Every scenario generates a seeded random input fixture, runs the reference,
//! releases the reference weights, runs the candidate executable through its
//! positional-argument protocol and compares the two output fixtures.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use layercheck::{HarnessConfig, Scenario, ScenarioDriver};
//!
//! let config = HarnessConfig::load("layercheck.yaml")?;
//! let scenarios = Scenario::all(&config)?;
//! let driver = ScenarioDriver::new(config);
//! for (name, outcome) in driver.run_all(&scenarios) {
//!     println!("{}: {:?}", name, outcome.map(|o| o.verdict));
//! }
//! ```

#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod fixture;
pub mod models;
pub mod runner;
pub mod scenario;
pub mod workspace;

// Re-exports for convenience
pub use analysis::{analyze, ErrorReport, Tolerance, Verdict};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use fixture::{FixtureGenerator, FlatTensor};
pub use scenario::{Scenario, ScenarioDriver, ScenarioOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Absolute difference above which an element counts as significant
pub const SIGNIFICANCE_THRESHOLD: f64 = 1e-4;

/// Seed for generated input fixtures
pub const DEFAULT_SEED: u64 = 42;

/// Timed reference forward passes per scenario
pub const REFERENCE_ITERATIONS: u32 = 10;

/// RMSNorm epsilon when neither the config nor the checkpoint sets one
pub const DEFAULT_RMS_NORM_EPS: f64 = 1e-6;
