//! Error analysis between reference and candidate outputs
//!
//! The analyzer only measures; pass/fail policy lives in [`Tolerance`],
//! applied per sublayer by the scenario driver.

mod analyzer;
mod tolerance;

pub use analyzer::{analyze, analyze_tensors, analyze_values, ErrorReport};
pub use tolerance::{Tolerance, Verdict};
