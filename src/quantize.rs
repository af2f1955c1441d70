//! Affine quantization primitives
//!
//! Implements the affine (asymmetric) quantization scheme:
//!
//! ```text
//! real_value = (quantized_value - zero_point) * scale
//! ```
//!
//! - `scale` is the real-number step size represented by one fixed-point unit
//! - `zero_point` is the fixed-point value representing real 0.0
//!
//! Requantization rounds to nearest and saturates to the representable range
//! of the target element type. Out-of-range values clamp to the boundary;
//! they never wrap and are not an error.
//!
//! [`quantize`] takes the reciprocal of the scale rather than dividing by it:
//! callers compute the reciprocal once per row, not once per element.

use serde::{Deserialize, Serialize};

use crate::dtype::QuantElem;
use crate::tensor::Tensor;

/// Per-tensor affine quantization parameters
///
/// The canonical `(scale, zero_point)` pair. Both call shapes of the
/// normalization operation resolve to this struct before any computation:
/// scalar arguments directly, single-element tensor arguments through
/// [`QuantParams::from_tensors`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    /// Real-number step size of one fixed-point unit
    pub scale: f64,
    /// Fixed-point value representing real 0.0
    pub zero_point: i64,
}

impl QuantParams {
    /// Create quantization parameters from scalar values
    #[must_use]
    pub fn new(scale: f64, zero_point: i64) -> Self {
        Self { scale, zero_point }
    }

    /// Extract quantization parameters from single-element tensors
    ///
    /// Reads the first element of each tensor. Extraction happens exactly
    /// once, before any statistics or normalization work; the hot loops only
    /// ever see the folded scalar pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use normalizar::{QuantParams, Tensor};
    ///
    /// let scale = Tensor::from_vec(vec![1], vec![0.5f32]).unwrap();
    /// let zero_point = Tensor::from_vec(vec![1], vec![10i64]).unwrap();
    /// let params = QuantParams::from_tensors(&scale, &zero_point);
    /// assert_eq!(params, QuantParams::new(0.5, 10));
    /// ```
    #[must_use]
    pub fn from_tensors(scale: &Tensor<f32>, zero_point: &Tensor<i64>) -> Self {
        Self {
            scale: f64::from(scale.data()[0]),
            zero_point: zero_point.data()[0],
        }
    }
}

/// Dequantize a fixed-point element to a real value
///
/// Computes `(q - zero_point) * scale`. Total over the representable range
/// of the element type; there is no error condition.
///
/// # Examples
///
/// ```
/// use normalizar::quantize::dequantize;
///
/// assert_eq!(dequantize(130u8, 0.5, 128), 1.0);
/// assert_eq!(dequantize(-4i8, 0.25, 0), -1.0);
/// ```
#[inline]
pub fn dequantize<T: QuantElem>(q: T, scale: f64, zero_point: i64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let centered = (q.to_i64() - zero_point) as f64;
    centered * scale
}

/// Quantize a real value to a fixed-point element
///
/// Computes `round(x * inv_scale) + zero_point`, saturated to the
/// representable range of `T`. `inv_scale` is the reciprocal of the output
/// scale; computing it once per row avoids a division per element.
///
/// Rounds half away from zero. Values beyond the representable range clamp
/// to the nearest boundary.
///
/// # Examples
///
/// ```
/// use normalizar::quantize::quantize;
///
/// let q: u8 = quantize(1.0, 2.0, 128);
/// assert_eq!(q, 130);
///
/// // Saturation, not wrapping
/// let q: u8 = quantize(1000.0, 1.0, 0);
/// assert_eq!(q, 255);
/// ```
#[inline]
pub fn quantize<T: QuantElem>(x: f64, inv_scale: f64, zero_point: i64) -> T {
    // Float-to-int casts saturate at the i64 bounds, so the intermediate
    // addition cannot wrap even for extreme inputs.
    #[allow(clippy::cast_possible_truncation)]
    let rounded = (x * inv_scale).round() as i64;
    T::from_i64_clamped(rounded.saturating_add(zero_point))
}
