//! # Normalizar
//!
//! Quantized layer normalization for affine fixed-point tensors.
//!
//! Normalizar (Spanish: "to normalize") normalizes an affine-quantized
//! tensor along its trailing dimension without materializing a float copy.
//! Row statistics accumulate in the integer domain, the zero point is
//! corrected algebraically once per row, and requantization saturates to the
//! output element range. The 8-bit element widths carry AVX2-accelerated
//! inner loops with runtime feature detection, and independent rows are
//! processed in parallel once the row count warrants it.
//!
//! ## Example
//!
//! ```rust
//! use normalizar::{quantized_layer_norm_per_tensor, QTensor, Tensor};
//!
//! let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![10u8, 10, 10, 10]).unwrap());
//! let weight = Tensor::from_vec(vec![4], vec![1.0f32; 4]).unwrap();
//! let bias = Tensor::from_vec(vec![4], vec![0.0f32; 4]).unwrap();
//! let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, 4]).unwrap());
//!
//! quantized_layer_norm_per_tensor(
//!     &input, 1.0, 0, &[4], &weight, &bias, 1e-5, 1.0, 128, &mut out,
//! );
//!
//! let QTensor::QUInt8(result) = out else { unreachable!() };
//! assert_eq!(result.data(), &[128, 128, 128, 128]);
//! ```
//!
//! ## Architecture
//!
//! - [`tensor`]: owned, contiguous, row-major tensor storage
//! - [`dtype`]: the closed set of fixed-point element types and the tagged
//!   union that drives runtime dispatch
//! - [`quantize`]: affine quantize/dequantize primitives
//! - [`layer_norm`]: the two-pass normalization kernel and its operator
//!   entry points
//!
//! ## Contract
//!
//! The kernel is fail-fast: an unsupported element type pairing or an
//! inconsistent configuration aborts via a panic rather than returning a
//! recoverable error, because continuing would silently corrupt numeric
//! results. Quantization range overflow is not an error; it saturates.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)] // Fixed-point narrowing is clamped first
#![allow(clippy::cast_precision_loss)] // i64 -> f64 for row statistics is bounded
#![allow(clippy::cast_possible_truncation)] // f64 -> f32 lane splats in SIMD paths
#![allow(clippy::cast_sign_loss)] // Clamped narrowing to unsigned widths
#![allow(clippy::too_many_arguments)] // Kernel entry points mirror the operator signature
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::missing_panics_doc)] // Panics documented where they are contractual
#![allow(clippy::float_cmp)] // Exact float comparisons in tests

pub mod dtype;
pub mod error;
/// Quantized layer normalization kernel and operator entry points
pub mod layer_norm;
pub mod quantize;
#[cfg(target_arch = "x86_64")]
pub(crate) mod simd;
pub mod tensor;

// Re-exports for convenience
pub use dtype::{DType, QTensor, QuantElem};
pub use error::{NormalizarError, Result};
pub use layer_norm::{quantized_layer_norm, quantized_layer_norm_per_tensor};
pub use quantize::QuantParams;
pub use tensor::Tensor;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
