//! Seeded standard-normal input generation
//!
//! Each generator owns its RNG state, so scenarios seeded alike produce
//! identical inputs no matter how many other scenarios ran before them.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::tensor::FlatTensor;
use super::text::write_text;
use crate::error::Result;

/// Produces reproducible N(0, 1) fixtures
pub struct FixtureGenerator {
    seed: u64,
    rng: StdRng,
}

impl FixtureGenerator {
    /// Create a generator whose stream is fully determined by `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed this generator was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw a tensor of `shape` with independent standard-normal values
    pub fn generate(&mut self, shape: &[usize]) -> FlatTensor {
        let numel: usize = shape.iter().product();

        // Box-Muller; u1 in (0, 1] keeps ln finite
        let data: Vec<f32> = (0..numel)
            .map(|_| {
                let u1: f64 = 1.0 - self.rng.gen::<f64>();
                let u2: f64 = self.rng.gen::<f64>();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                z as f32
            })
            .collect();

        FlatTensor::new_unchecked(shape.to_vec(), data)
    }

    /// Draw a tensor and persist it as a text fixture
    pub fn generate_to<P: AsRef<Path>>(&mut self, shape: &[usize], path: P) -> Result<FlatTensor> {
        let path = path.as_ref();
        let tensor = self.generate(shape);
        write_text(&tensor, path)?;

        let (head, tail) = tensor.preview(10);
        info!("Random input {:?} generated at {:?}", shape, path);
        debug!("Input (first 10 elements): {:?}", head);
        debug!("Input (last 10 elements): {:?}", tail);
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_values() {
        let a = FixtureGenerator::new(42).generate(&[2, 8]);
        let b = FixtureGenerator::new(42).generate(&[2, 8]);
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[2, 8]);
    }

    #[test]
    fn test_independent_of_call_order() {
        let mut first = FixtureGenerator::new(7);
        let _ = first.generate(&[100]);
        let mut second = FixtureGenerator::new(7);
        assert_ne!(first.generate(&[4]), second.generate(&[4]));
        assert_eq!(FixtureGenerator::new(7).generate(&[4]), FixtureGenerator::new(7).generate(&[4]));
    }

    #[test]
    fn test_roughly_standard_normal() {
        let t = FixtureGenerator::new(42).generate(&[20_000]);
        let n = t.numel() as f64;
        let mean = t.data().iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = t.data().iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.05, "mean = {mean}");
        assert!((var - 1.0).abs() < 0.05, "var = {var}");
        assert!(t.data().iter().all(|v| v.is_finite()));
    }
}
