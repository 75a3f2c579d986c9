//! Positional argument protocols of the candidate executables
//!
//! The candidate binaries read their arguments strictly by position. Each
//! variant below is the only place its order is written down.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::fixture::shape_csv;

/// One candidate call, by sublayer
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// `<input_text> <weight_text> <output_text> <shape_csv> <epsilon>`
    Norm {
        /// Input activations (text)
        input: PathBuf,
        /// Norm scale (text)
        weight: PathBuf,
        /// Where the candidate writes its output (text)
        output: PathBuf,
        /// Input shape, last dimension normalized
        shape: Vec<usize>,
        /// Epsilon under the square root
        epsilon: f64,
    },

    /// `<input_text> <weight_binary> <output_text> <N> <K> <M>`
    Projection {
        /// Input activations (text)
        input: PathBuf,
        /// Row-major [M, K] weight (binary)
        weight: PathBuf,
        /// Where the candidate writes its output (text)
        output: PathBuf,
        /// Rows
        n: usize,
        /// Input features
        k: usize,
        /// Output features
        m: usize,
    },

    /// `<weights_source> <input_text> <output_text> <N> <K_in> <K_up> <K_out>
    /// <layer_index> <use_mmap 0|1> <use_prefetch 0|1>`
    Mlp {
        /// Checkpoint the candidate loads its own weights from
        weights_source: PathBuf,
        /// Input activations (text)
        input: PathBuf,
        /// Where the candidate writes its output (text)
        output: PathBuf,
        /// Rows
        n: usize,
        /// Input features
        k_in: usize,
        /// Intermediate features
        k_up: usize,
        /// Output features
        k_out: usize,
        /// Decoder layer the MLP belongs to
        layer_index: usize,
        /// Memory-map the checkpoint
        use_mmap: bool,
        /// Issue prefetch advice on the mapping
        use_prefetch: bool,
    },
}

fn flag(value: bool) -> OsString {
    OsString::from(if value { "1" } else { "0" })
}

fn num(value: usize) -> OsString {
    value.to_string().into()
}

impl Invocation {
    /// Render the positional argument list
    pub fn to_args(&self) -> Vec<OsString> {
        match self {
            Invocation::Norm {
                input,
                weight,
                output,
                shape,
                epsilon,
            } => vec![
                input.into(),
                weight.into(),
                output.into(),
                shape_csv(shape).into(),
                epsilon.to_string().into(),
            ],
            Invocation::Projection {
                input,
                weight,
                output,
                n,
                k,
                m,
            } => vec![
                input.into(),
                weight.into(),
                output.into(),
                num(*n),
                num(*k),
                num(*m),
            ],
            Invocation::Mlp {
                weights_source,
                input,
                output,
                n,
                k_in,
                k_up,
                k_out,
                layer_index,
                use_mmap,
                use_prefetch,
            } => vec![
                weights_source.into(),
                input.into(),
                output.into(),
                num(*n),
                num(*k_in),
                num(*k_up),
                num(*k_out),
                num(*layer_index),
                flag(*use_mmap),
                flag(*use_prefetch),
            ],
        }
    }

    /// Output fixture the candidate is expected to write
    pub fn output_path(&self) -> &Path {
        match self {
            Invocation::Norm { output, .. }
            | Invocation::Projection { output, .. }
            | Invocation::Mlp { output, .. } => output,
        }
    }

    /// Shape of the output the candidate must produce
    pub fn output_shape(&self) -> Vec<usize> {
        match self {
            Invocation::Norm { shape, .. } => shape.clone(),
            Invocation::Projection { n, m, .. } => vec![*n, *m],
            Invocation::Mlp { n, k_out, .. } => vec![*n, *k_out],
        }
    }

    /// Sublayer label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Invocation::Norm { .. } => "RMSNorm",
            Invocation::Projection { .. } => "gate projection",
            Invocation::Mlp { .. } => "MLP",
        }
    }
}
