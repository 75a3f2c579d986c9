//! Divergence metrics over a flattened (reference, candidate) pair

use std::fmt;
use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::fixture::{read_text_as, FlatTensor};
use crate::SIGNIFICANCE_THRESHOLD;

/// Aggregate divergence between a reference and a candidate output
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// Number of compared elements
    pub total_elements: usize,
    /// sqrt(mean((r - a)^2))
    pub l2_error: f64,
    /// max(|r - a|)
    pub max_error: f64,
    /// |norm(r) - norm(a)| / (norm(r) + 1e-12), as a fraction
    pub relative_error: f64,
    /// Elements with |r - a| strictly above the significance threshold
    pub significant_count: usize,
    /// 100 * significant_count / total_elements
    pub significant_pct: f64,
}

impl ErrorReport {
    /// Relative norm error as a percentage
    pub fn relative_error_pct(&self) -> f64 {
        self.relative_error * 100.0
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error Analysis:")?;
        writeln!(f, "L2 Error: {}", self.l2_error)?;
        writeln!(f, "Max Error: {}", self.max_error)?;
        writeln!(f, "Relative Error (L2 norm): {}%", self.relative_error_pct())?;
        write!(
            f,
            "Elements with error > {}: {} ({}%)",
            SIGNIFICANCE_THRESHOLD, self.significant_count, self.significant_pct
        )
    }
}

/// Compare two text fixtures
///
/// Both files are read at f64 precision. A missing or unparseable file is a
/// `FixtureLoad` error; differing lengths are a `ShapeMismatch`.
pub fn analyze<P: AsRef<Path>, Q: AsRef<Path>>(reference_path: P, candidate_path: Q) -> Result<ErrorReport> {
    let reference = load(reference_path.as_ref())?;
    let candidate = load(candidate_path.as_ref())?;
    analyze_values(&reference, &candidate)
}

fn load(path: &Path) -> Result<Vec<f64>> {
    read_text_as::<f64, _>(path).map_err(|e| match e {
        HarnessError::MissingFixture { path } => HarnessError::FixtureLoad {
            path,
            reason: "file does not exist".to_string(),
        },
        other => other,
    })
}

/// Compare two in-memory tensors of identical element count
pub fn analyze_tensors(reference: &FlatTensor, candidate: &FlatTensor) -> Result<ErrorReport> {
    let widen = |t: &FlatTensor| t.data().iter().map(|&v| v as f64).collect::<Vec<f64>>();
    analyze_values(&widen(reference), &widen(candidate))
}

/// Compute every metric over equal-length flat arrays
pub fn analyze_values(reference: &[f64], candidate: &[f64]) -> Result<ErrorReport> {
    if reference.len() != candidate.len() {
        return Err(HarnessError::ShapeMismatch {
            context: "reference vs candidate comparison".to_string(),
            expected: vec![reference.len()],
            actual: candidate.len(),
        });
    }

    let n = reference.len();
    if n == 0 {
        return Ok(ErrorReport {
            total_elements: 0,
            l2_error: 0.0,
            max_error: 0.0,
            relative_error: 0.0,
            significant_count: 0,
            significant_pct: 0.0,
        });
    }

    let mut sum_sq = 0.0f64;
    let mut max_error = 0.0f64;
    let mut significant_count = 0usize;
    let mut ref_sq = 0.0f64;
    let mut cand_sq = 0.0f64;

    for (&r, &a) in reference.iter().zip(candidate) {
        let diff = (r - a).abs();
        sum_sq += diff * diff;
        // f64::max would swallow NaN
        if diff.is_nan() || diff > max_error {
            max_error = diff;
        }
        if diff > SIGNIFICANCE_THRESHOLD {
            significant_count += 1;
        }
        ref_sq += r * r;
        cand_sq += a * a;
    }

    let norm_ref = ref_sq.sqrt();
    let norm_cand = cand_sq.sqrt();

    Ok(ErrorReport {
        total_elements: n,
        l2_error: (sum_sq / n as f64).sqrt(),
        max_error,
        // Compares magnitudes only; equal-norm vectors score zero here
        relative_error: (norm_ref - norm_cand).abs() / (norm_ref + 1e-12),
        significant_count,
        significant_pct: 100.0 * significant_count as f64 / n as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_constant_offset() {
        let reference = vec![1.0, -2.0, 3.5, 0.0];
        let candidate: Vec<f64> = reference.iter().map(|v| v + 0.25).collect();

        let report = analyze_values(&reference, &candidate).unwrap();
        assert_eq!(report.max_error, 0.25);
        assert_eq!(report.l2_error, 0.25);
        assert_eq!(report.significant_count, 4);
        assert_eq!(report.significant_pct, 100.0);
    }

    #[test]
    fn test_length_mismatch_is_hard_failure() {
        let reference = vec![0.0; 10];
        let candidate = vec![0.0; 9];
        let err = analyze_values(&reference, &candidate).unwrap_err();
        match err {
            HarnessError::ShapeMismatch { expected, actual, .. } => {
                assert_eq!(expected, vec![10]);
                assert_eq!(actual, 9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_threshold_is_strictly_greater() {
        let dir = tempdir().unwrap();
        let ref_path = dir.path().join("out_reference.txt");
        let cand_path = dir.path().join("out_candidate.txt");
        fs::write(&ref_path, "1.0\n2.0\n3.0\n4.0\n").unwrap();
        fs::write(&cand_path, "1.0001\n2.0\n3.0\n3.9998\n").unwrap();

        let report = analyze(&ref_path, &cand_path).unwrap();
        assert!((report.max_error - 0.0002).abs() < 1e-9);
        assert_eq!(report.significant_count, 1);
        assert_eq!(report.significant_pct, 25.0);
    }

    #[test]
    fn test_relative_error_ignores_direction() {
        // Same norm, opposite signs: only l2/max see the difference
        let reference = vec![3.0, 4.0];
        let candidate = vec![-3.0, -4.0];
        let report = analyze_values(&reference, &candidate).unwrap();
        assert_eq!(report.relative_error, 0.0);
        assert!(report.l2_error > 1.0);
        assert_eq!(report.max_error, 8.0);
    }

    #[test]
    fn test_relative_error_pct() {
        let report = analyze_values(&[3.0, 4.0], &[6.0, 8.0]).unwrap();
        assert!((report.relative_error - 1.0).abs() < 1e-9);
        assert!((report.relative_error_pct() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_nan_propagates_to_max_error() {
        let report = analyze_values(&[1.0, 2.0], &[f64::NAN, 2.0]).unwrap();
        assert!(report.max_error.is_nan());
        assert!(report.l2_error.is_nan());
    }

    #[test]
    fn test_empty_inputs() {
        let report = analyze_values(&[], &[]).unwrap();
        assert_eq!(report.total_elements, 0);
        assert_eq!(report.significant_pct, 0.0);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("a.txt");
        fs::write(&present, "1\n").unwrap();

        let err = analyze(&present, dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, HarnessError::FixtureLoad { .. }));
    }

    #[test]
    fn test_report_display() {
        let report = analyze_values(&[1.0, 2.0], &[1.0, 2.5]).unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Error Analysis:"));
        assert!(text.contains("Max Error: 0.5"));
        assert!(text.contains("Elements with error > 0.0001: 1 (50%)"));
    }

    #[test]
    fn test_analyze_tensors() {
        let r = FlatTensor::new(vec![1, 2], vec![1.0, 2.0]).unwrap();
        let a = FlatTensor::new(vec![2], vec![1.0, 2.0]).unwrap();
        let report = analyze_tensors(&r, &a).unwrap();
        assert_eq!(report.max_error, 0.0);
    }

    proptest! {
        #[test]
        fn prop_self_comparison_is_zero(values in proptest::collection::vec(-1e6f64..1e6, 1..128)) {
            let report = analyze_values(&values, &values).unwrap();
            prop_assert_eq!(report.l2_error, 0.0);
            prop_assert_eq!(report.max_error, 0.0);
            prop_assert_eq!(report.relative_error, 0.0);
            prop_assert_eq!(report.significant_count, 0);
        }
    }
}
