//! Tensor fixtures shared between the reference and the candidate
//!
//! - Flat row-major tensors with out-of-band shapes
//! - Text encoding (one value per line) for activations that get compared
//! - Raw little-endian f32 encoding for weights handed to the candidate
//! - Seeded random input generation

mod binary;
mod generator;
mod tensor;
mod text;

pub use binary::{read_binary, write_binary};
pub use generator::FixtureGenerator;
pub use tensor::{parse_shape, FlatTensor};
pub(crate) use tensor::shape_csv;
pub use text::{read_text, read_text_as, read_text_shaped, write_text, write_text_exact};
