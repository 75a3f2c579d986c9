//! Qwen3 sublayers on candle, loaded from safetensors checkpoints

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ReferenceModel, SublayerDims};
use crate::error::{HarnessError, Result};
use crate::fixture::FlatTensor;

const FINAL_NORM_KEY: &str = "model.norm.weight";

fn mlp_key(layer: usize, proj: &str) -> String {
    format!("model.layers.{}.mlp.{}.weight", layer, proj)
}

/// Swish activation: x * sigmoid(x)
fn silu(x: &Tensor) -> Result<Tensor> {
    let sigmoid = candle_nn::ops::sigmoid(x)?;
    Ok((x * sigmoid)?)
}

fn to_device(input: &FlatTensor) -> Result<Tensor> {
    Ok(Tensor::from_slice(input.data(), input.shape(), &Device::Cpu)?)
}

fn to_host(output: &Tensor) -> Result<FlatTensor> {
    let shape = output.dims().to_vec();
    let data: Vec<f32> = output.flatten_all()?.to_vec1()?;
    FlatTensor::new(shape, data)
}

fn check_last_dim(name: &str, input: &FlatTensor, expected: usize) -> Result<()> {
    if input.shape().last() != Some(&expected) {
        let mut shape = input.shape().to_vec();
        match shape.last_mut() {
            Some(last) => *last = expected,
            None => shape.push(expected),
        }
        return Err(HarnessError::ShapeMismatch {
            context: format!("{} input", name),
            expected: shape,
            actual: input.numel(),
        });
    }
    Ok(())
}

/// Fields read from the HF `config.json` next to the weights
#[derive(Debug, Default, Deserialize)]
struct CheckpointConfig {
    #[serde(default)]
    rms_norm_eps: Option<f64>,
}

/// Pretrained Qwen3 weights: one safetensors file or a directory of shards
#[derive(Debug)]
pub struct Qwen3Checkpoint {
    path: PathBuf,
    files: Vec<PathBuf>,
    rms_norm_eps: Option<f64>,
}

impl Qwen3Checkpoint {
    /// Locate the weight files and the optional `config.json`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let not_found = |reason: &str| HarnessError::Config {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let (files, config_dir) = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|e| HarnessError::io(path, e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().map_or(false, |e| e == "safetensors"))
                .collect();
            files.sort();
            (files, path.to_path_buf())
        } else if path.is_file() {
            let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            (vec![path.to_path_buf()], dir)
        } else {
            return Err(not_found("checkpoint does not exist"));
        };

        if files.is_empty() {
            return Err(not_found("no .safetensors files in checkpoint directory"));
        }

        let config_path = config_dir.join("config.json");
        let rms_norm_eps = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|e| HarnessError::io(&config_path, e))?;
            let config: CheckpointConfig =
                serde_json::from_str(&content).map_err(|e| HarnessError::Config {
                    path: config_path.clone(),
                    reason: e.to_string(),
                })?;
            debug!("config.json rms_norm_eps: {:?}", config.rms_norm_eps);
            config.rms_norm_eps
        } else {
            None
        };

        info!("Reference checkpoint {:?} ({} file(s))", path, files.len());
        Ok(Self {
            path: path.to_path_buf(),
            files,
            rms_norm_eps,
        })
    }

    /// Path the checkpoint was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `rms_norm_eps` declared by `config.json`, if any
    pub fn rms_norm_eps(&self) -> Option<f64> {
        self.rms_norm_eps
    }

    /// Load the named tensors as F32
    ///
    /// Shards are memory-mapped; only the requested tensors are copied out.
    pub fn load_tensors(&self, names: &[String]) -> Result<HashMap<String, Tensor>> {
        let shards = unsafe { MmapedSafetensors::multi(self.files.as_slice())? };

        let mut found = HashMap::new();
        for name in names {
            if shards.get(name).is_err() {
                return Err(HarnessError::FixtureLoad {
                    path: self.path.clone(),
                    reason: format!("tensor '{}' not found in checkpoint", name),
                });
            }
            let tensor = shards.load(name, &Device::Cpu)?.to_dtype(DType::F32)?;
            debug!("Loaded {} {:?}", name, tensor.dims());
            found.insert(name.clone(), tensor);
        }
        Ok(found)
    }

    fn take(tensors: &mut HashMap<String, Tensor>, name: &str) -> Result<Tensor> {
        tensors.remove(name).ok_or_else(|| {
            HarnessError::Reference(candle_core::Error::Msg(format!("tensor '{}' not loaded", name)))
        })
    }

    /// Final model norm, with `epsilon` overriding the checkpoint's value
    pub fn rms_norm(&self, epsilon: Option<f64>) -> Result<RmsNormReference> {
        let mut tensors = self.load_tensors(&[FINAL_NORM_KEY.to_string()])?;
        let weight = Self::take(&mut tensors, FINAL_NORM_KEY)?;
        let eps = epsilon.or(self.rms_norm_eps).unwrap_or(crate::DEFAULT_RMS_NORM_EPS);
        RmsNormReference::from_tensor(weight, eps)
    }

    /// `gate_proj` of one decoder layer
    pub fn gate_proj(&self, layer: usize) -> Result<ProjectionReference> {
        let key = mlp_key(layer, "gate_proj");
        let mut tensors = self.load_tensors(&[key.clone()])?;
        ProjectionReference::from_tensor(Self::take(&mut tensors, &key)?)
    }

    /// Full MLP of one decoder layer
    pub fn mlp(&self, layer: usize) -> Result<MlpReference> {
        let keys: Vec<String> = ["gate_proj", "up_proj", "down_proj"]
            .iter()
            .map(|p| mlp_key(layer, p))
            .collect();
        let mut tensors = self.load_tensors(&keys)?;
        MlpReference::from_tensors(
            Self::take(&mut tensors, &keys[0])?,
            Self::take(&mut tensors, &keys[1])?,
            Self::take(&mut tensors, &keys[2])?,
        )
    }
}

/// RMS normalization over the last dimension: x / sqrt(mean(x^2) + eps) * w
#[derive(Debug)]
pub struct RmsNormReference {
    weight: Tensor,
    eps: f64,
    hidden: usize,
}

impl RmsNormReference {
    /// Build from host values
    pub fn new(weight: &[f32], eps: f64) -> Result<Self> {
        let weight = Tensor::from_slice(weight, (weight.len(),), &Device::Cpu)?;
        Self::from_tensor(weight, eps)
    }

    fn from_tensor(weight: Tensor, eps: f64) -> Result<Self> {
        let hidden = weight.dims1()?;
        Ok(Self { weight, eps, hidden })
    }

    /// Epsilon added under the square root
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Learned scale, length `hidden`
    pub fn weight(&self) -> Result<FlatTensor> {
        to_host(&self.weight)
    }
}

impl ReferenceModel for RmsNormReference {
    fn name(&self) -> &str {
        "RMSNorm"
    }

    fn dims(&self) -> SublayerDims {
        SublayerDims {
            input: self.hidden,
            hidden: self.hidden,
            output: self.hidden,
        }
    }

    fn forward(&self, input: &FlatTensor) -> Result<FlatTensor> {
        check_last_dim(self.name(), input, self.hidden)?;
        let x = to_device(input)?;
        let variance = x.sqr()?.mean_keepdim(D::Minus1)?;
        let rms = (variance + self.eps)?.sqrt()?;
        let y = x.broadcast_div(&rms)?.broadcast_mul(&self.weight)?;
        to_host(&y)
    }
}

/// Bias-free linear projection y = x W^T, with W stored as [M, K]
#[derive(Debug)]
pub struct ProjectionReference {
    linear: Linear,
    in_features: usize,
    out_features: usize,
}

impl ProjectionReference {
    /// Build from a row-major [out_features, in_features] weight
    pub fn new(weight: &[f32], out_features: usize, in_features: usize) -> Result<Self> {
        let w = Tensor::from_slice(weight, (out_features, in_features), &Device::Cpu)?;
        Self::from_tensor(w)
    }

    fn from_tensor(weight: Tensor) -> Result<Self> {
        let (out_features, in_features) = weight.dims2()?;
        Ok(Self {
            linear: Linear::new(weight, None),
            in_features,
            out_features,
        })
    }

    /// Weight as the candidate expects it: row-major [M, K]
    pub fn weight(&self) -> Result<FlatTensor> {
        to_host(self.linear.weight())
    }
}

impl ReferenceModel for ProjectionReference {
    fn name(&self) -> &str {
        "gate_proj"
    }

    fn dims(&self) -> SublayerDims {
        SublayerDims {
            input: self.in_features,
            hidden: self.out_features,
            output: self.out_features,
        }
    }

    fn forward(&self, input: &FlatTensor) -> Result<FlatTensor> {
        check_last_dim(self.name(), input, self.in_features)?;
        let x = to_device(input)?;
        to_host(&self.linear.forward(&x)?)
    }
}

/// Gated MLP: down(silu(gate(x)) * up(x))
#[derive(Debug)]
pub struct MlpReference {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    dims: SublayerDims,
}

impl MlpReference {
    /// Build from row-major weights: gate/up [K_up, K_in], down [K_out, K_up]
    pub fn new(
        gate: &[f32],
        up: &[f32],
        down: &[f32],
        k_in: usize,
        k_up: usize,
        k_out: usize,
    ) -> Result<Self> {
        let dev = Device::Cpu;
        Self::from_tensors(
            Tensor::from_slice(gate, (k_up, k_in), &dev)?,
            Tensor::from_slice(up, (k_up, k_in), &dev)?,
            Tensor::from_slice(down, (k_out, k_up), &dev)?,
        )
    }

    fn from_tensors(gate: Tensor, up: Tensor, down: Tensor) -> Result<Self> {
        let (k_up, k_in) = gate.dims2()?;
        let (up_rows, up_cols) = up.dims2()?;
        let (k_out, down_cols) = down.dims2()?;
        if (up_rows, up_cols) != (k_up, k_in) || down_cols != k_up {
            return Err(HarnessError::Reference(candle_core::Error::Msg(format!(
                "inconsistent MLP weights: gate {:?}, up {:?}, down {:?}",
                gate.dims(),
                up.dims(),
                down.dims()
            ))));
        }

        Ok(Self {
            gate_proj: Linear::new(gate, None),
            up_proj: Linear::new(up, None),
            down_proj: Linear::new(down, None),
            dims: SublayerDims {
                input: k_in,
                hidden: k_up,
                output: k_out,
            },
        })
    }
}

impl ReferenceModel for MlpReference {
    fn name(&self) -> &str {
        "MLP"
    }

    fn dims(&self) -> SublayerDims {
        self.dims
    }

    fn forward(&self, input: &FlatTensor) -> Result<FlatTensor> {
        check_last_dim(self.name(), input, self.dims.input)?;
        let x = to_device(input)?;
        let gate = silu(&self.gate_proj.forward(&x)?)?;
        let up = self.up_proj.forward(&x)?;
        let y = self.down_proj.forward(&(gate * up)?)?;
        to_host(&y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::safetensors;
    use tempfile::tempdir;

    fn approx(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol)
    }

    #[test]
    fn test_rms_norm_forward() {
        let norm = RmsNormReference::new(&[1.0, 2.0], 0.0).unwrap();
        let input = FlatTensor::new(vec![1, 2], vec![3.0, 4.0]).unwrap();

        let out = norm.forward(&input).unwrap();

        // rms = sqrt((9 + 16) / 2)
        let rms = 12.5f32.sqrt();
        assert_eq!(out.shape(), &[1, 2]);
        assert!(approx(out.data(), &[3.0 / rms, 8.0 / rms], 1e-6));
    }

    #[test]
    fn test_rms_norm_rejects_wrong_width() {
        let norm = RmsNormReference::new(&[1.0; 4], 1e-6).unwrap();
        let input = FlatTensor::new(vec![1, 3], vec![1.0; 3]).unwrap();
        assert!(matches!(
            norm.forward(&input).unwrap_err(),
            HarnessError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_projection_forward() {
        // W = [[1, 0, 1], [0, 2, 0]] : [M=2, K=3]
        let proj = ProjectionReference::new(&[1.0, 0.0, 1.0, 0.0, 2.0, 0.0], 2, 3).unwrap();
        let input = FlatTensor::new(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();

        let out = proj.forward(&input).unwrap();

        assert_eq!(proj.dims(), SublayerDims { input: 3, hidden: 2, output: 2 });
        assert_eq!(out.shape(), &[1, 2]);
        assert!(approx(out.data(), &[4.0, 4.0], 1e-6));
        assert_eq!(proj.weight().unwrap().shape(), &[2, 3]);
    }

    #[test]
    fn test_mlp_forward() {
        // K_in = 2, K_up = 2, K_out = 1
        let gate = [1.0, 0.0, 0.0, 1.0];
        let up = [1.0, 1.0, 1.0, 1.0];
        let down = [1.0, -1.0];
        let mlp = MlpReference::new(&gate, &up, &down, 2, 2, 1).unwrap();
        let input = FlatTensor::new(vec![1, 2], vec![1.0, 2.0]).unwrap();

        let out = mlp.forward(&input).unwrap();

        let silu = |v: f32| v / (1.0 + (-v).exp());
        let expected = silu(1.0) * 3.0 - silu(2.0) * 3.0;
        assert_eq!(out.shape(), &[1, 1]);
        assert!(approx(out.data(), &[expected], 1e-5));
    }

    #[test]
    fn test_mlp_rejects_inconsistent_weights() {
        let result = MlpReference::new(&[0.0; 4], &[0.0; 4], &[0.0; 3], 2, 2, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_checkpoint_loads_requested_tensors() {
        let dir = tempdir().unwrap();
        let dev = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            FINAL_NORM_KEY.to_string(),
            Tensor::from_slice(&[1.0f32, 1.0, 1.0], (3,), &dev).unwrap(),
        );
        tensors.insert(
            mlp_key(0, "gate_proj"),
            Tensor::from_slice(&[0.5f32; 6], (2, 3), &dev).unwrap(),
        );
        safetensors::save(&tensors, dir.path().join("model.safetensors")).unwrap();
        fs::write(dir.path().join("config.json"), r#"{"hidden_size": 3, "rms_norm_eps": 1e-06}"#).unwrap();

        let ckpt = Qwen3Checkpoint::open(dir.path()).unwrap();
        assert_eq!(ckpt.rms_norm_eps(), Some(1e-6));

        let norm = ckpt.rms_norm(None).unwrap();
        assert_eq!(norm.dims().input, 3);
        assert_eq!(norm.eps(), 1e-6);

        let gate = ckpt.gate_proj(0).unwrap();
        assert_eq!(gate.dims(), SublayerDims { input: 3, hidden: 2, output: 2 });

        assert!(matches!(
            ckpt.gate_proj(1).unwrap_err(),
            HarnessError::FixtureLoad { .. }
        ));
    }

    #[test]
    fn test_checkpoint_missing_path() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Qwen3Checkpoint::open(dir.path().join("absent")).unwrap_err(),
            HarnessError::Config { .. }
        ));
        assert!(matches!(
            Qwen3Checkpoint::open(dir.path()).unwrap_err(),
            HarnessError::Config { .. }
        ));
    }

    #[test]
    fn test_checkpoint_rejects_malformed_config() {
        let dir = tempdir().unwrap();
        let mut tensors = HashMap::new();
        tensors.insert(
            FINAL_NORM_KEY.to_string(),
            Tensor::from_slice(&[1.0f32, 1.0], (2,), &Device::Cpu).unwrap(),
        );
        safetensors::save(&tensors, dir.path().join("model.safetensors")).unwrap();
        fs::write(dir.path().join("config.json"), r#"{"rms_norm_eps": "tiny"}"#).unwrap();

        assert!(matches!(
            Qwen3Checkpoint::open(dir.path()).unwrap_err(),
            HarnessError::Config { .. }
        ));
    }

    #[test]
    fn test_checkpoint_loads_across_shards() {
        let dir = tempdir().unwrap();
        let dev = Device::Cpu;
        let mut first = HashMap::new();
        first.insert(
            mlp_key(0, "gate_proj"),
            Tensor::from_slice(&[1.0f32; 4], (2, 2), &dev).unwrap(),
        );
        first.insert(
            mlp_key(0, "up_proj"),
            Tensor::from_slice(&[1.0f32; 4], (2, 2), &dev).unwrap(),
        );
        let mut second = HashMap::new();
        second.insert(
            mlp_key(0, "down_proj"),
            Tensor::from_slice(&[0.5f32; 2], (1, 2), &dev).unwrap(),
        );
        safetensors::save(&first, dir.path().join("model-00001-of-00002.safetensors")).unwrap();
        safetensors::save(&second, dir.path().join("model-00002-of-00002.safetensors")).unwrap();

        let ckpt = Qwen3Checkpoint::open(dir.path()).unwrap();
        assert_eq!(ckpt.rms_norm_eps(), None);

        let loaded = ckpt.load_tensors(&[mlp_key(0, "down_proj")]).unwrap();
        assert_eq!(loaded.len(), 1);

        let mlp = ckpt.mlp(0).unwrap();
        assert_eq!(mlp.dims(), SublayerDims { input: 2, hidden: 2, output: 1 });
    }
}
