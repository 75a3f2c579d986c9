//! Per-sublayer acceptance thresholds

use serde::{Deserialize, Serialize};

use super::analyzer::ErrorReport;

/// Acceptance bounds applied to an [`ErrorReport`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Largest allowed elementwise absolute difference
    pub max_error: f64,
    /// Largest allowed percentage of significant elements
    pub significant_pct: f64,
}

impl Tolerance {
    /// Normalization has a single reduction; keep it tight
    pub fn norm() -> Self {
        Self {
            max_error: 1e-3,
            significant_pct: 1.0,
        }
    }

    /// One matmul with a long accumulation
    pub fn projection() -> Self {
        Self {
            max_error: 5e-3,
            significant_pct: 10.0,
        }
    }

    /// Three matmuls plus an activation
    pub fn mlp() -> Self {
        Self {
            max_error: 1e-2,
            significant_pct: 25.0,
        }
    }

    /// Judge a report against these bounds
    pub fn judge(&self, report: &ErrorReport) -> Verdict {
        let mut violations = Vec::new();
        if report.max_error.is_nan() || report.max_error > self.max_error {
            violations.push(format!(
                "max error {:.3e} exceeds {:.3e}",
                report.max_error, self.max_error
            ));
        }
        if report.significant_pct.is_nan() || report.significant_pct > self.significant_pct {
            violations.push(format!(
                "{:.2}% significant elements exceeds {:.2}%",
                report.significant_pct, self.significant_pct
            ));
        }

        if violations.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail(violations)
        }
    }
}

/// Outcome of judging a report
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// All bounds held
    Pass,
    /// One message per violated bound
    Fail(Vec<String>),
}

impl Verdict {
    /// Whether every bound held
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_values;

    #[test]
    fn test_judge_pass_and_fail() {
        let report = analyze_values(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 3.9998]).unwrap();

        assert!(Tolerance::mlp().judge(&report).passed());
        assert!(!Tolerance::norm().judge(&report).passed());

        let strict = Tolerance {
            max_error: 1e-4,
            significant_pct: 0.0,
        };
        match strict.judge(&report) {
            Verdict::Fail(reasons) => assert_eq!(reasons.len(), 2),
            Verdict::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn test_nan_never_passes() {
        let report = analyze_values(&[1.0], &[f64::NAN]).unwrap();
        assert!(!Tolerance::mlp().judge(&report).passed());
    }
}
