//! Quantized layer normalization
//!
//! Normalizes an affine-quantized tensor along its trailing dimension
//! without materializing a float copy:
//!
//! ```text
//! y = quantize((dequantize(x) - mean) / sqrt(variance + eps) * weight + bias)
//! ```
//!
//! The tensor is visualized as a set of 1-d rows (all leading dimensions
//! flattened, the trailing dimension as the normalization axis). Each row
//! takes exactly two linear passes:
//!
//! 1. **Statistics**: `sum` and `sq_sum` accumulate in the integer domain,
//!    with the zero point corrected algebraically once per row instead of
//!    per element. The only float conversion happens at the end of the pass.
//! 2. **Normalization**: dequantize, apply the affine transform, requantize
//!    with saturation to the output element range.
//!
//! Rows are independent: above a row-count threshold they are processed in
//! parallel over disjoint output slices. The 8-bit element widths carry
//! AVX2 specializations with runtime feature detection and scalar fallback.

use rayon::prelude::*;

use crate::dtype::{QTensor, QuantElem};
use crate::quantize::{dequantize, quantize, QuantParams};
use crate::tensor::Tensor;

/// Row count at which rows are processed with rayon instead of serially
const PAR_ROW_THRESHOLD: usize = 32;

/// Longest row the AVX2 statistics path accepts
///
/// Keeps the i32 lane accumulators exact for 16-bit products; longer rows
/// take the scalar path with i64 accumulators.
#[cfg(target_arch = "x86_64")]
const SIMD_ROW_LIMIT: usize = 1 << 16;

/// Derive `(mean, inv_std)` from raw integer row sums
///
/// `sum` and `sq_sum` are the uncorrected sums of the quantized values and
/// their squares. Because `real_j = (q_j - zp) * scale`, the centered
/// moments follow algebraically:
///
/// ```text
/// sum_centered    = sum - n * zp
/// sq_sum_centered = sq_sum - 2 * zp * sum + n * zp²
/// ```
///
/// Variance is the population variance (no Bessel correction), computed as
/// `E[X²] - E[X]²`; `eps` is added before the square root.
fn row_moments(sum: i64, sq_sum: i64, n: usize, input: QuantParams, eps: f64) -> (f64, f64) {
    let n_int = n as i64;
    let zp = input.zero_point;

    let sum_centered = sum - n_int * zp;
    let sq_sum_centered = sq_sum - 2 * zp * sum + n_int * zp * zp;

    let n_float = n as f64;
    let mean = input.scale * sum_centered as f64 / n_float;
    let variance = input.scale * input.scale * sq_sum_centered as f64 / n_float - mean * mean;
    let inv_std = 1.0 / (variance + eps).sqrt();
    (mean, inv_std)
}

/// Scalar statistics pass: `(Σ q_j, Σ q_j²)` in i64 accumulators
fn row_sums_scalar<T: QuantElem>(x: &[T]) -> (i64, i64) {
    let mut sum = 0i64;
    let mut sq_sum = 0i64;
    for &q in x {
        let v = q.to_i64();
        sum += v;
        sq_sum += v * v;
    }
    (sum, sq_sum)
}

/// Scalar normalization pass over one row
fn normalize_row_scalar<T: QuantElem>(
    x: &[T],
    y: &mut [T],
    mean: f64,
    inv_std: f64,
    weight: &[f32],
    bias: &[f32],
    input: QuantParams,
    output_inv_scale: f64,
    output_zero_point: i64,
) {
    for j in 0..x.len() {
        let real = dequantize(x[j], input.scale, input.zero_point);
        let val = (real - mean) * inv_std * f64::from(weight[j]) + f64::from(bias[j]);
        y[j] = quantize(val, output_inv_scale, output_zero_point);
    }
}

// ============================================================================
// AVX2 specializations (8-bit element widths)
// ============================================================================

/// AVX2 statistics pass for unsigned bytes
///
/// Widens 16 bytes at a time to i16 lanes and accumulates sums and squares
/// with `madd` into i32 lanes. Exact within `SIMD_ROW_LIMIT`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn row_sums_u8_avx2(x: &[u8]) -> (i64, i64) {
    #[allow(clippy::wildcard_imports)]
    use std::arch::x86_64::*;

    let chunks = x.len() / 16;

    // SAFETY: AVX2 verified by the caller; loads stay within `x`
    let (mut sum, mut sq_sum) = unsafe {
        let ones = _mm256_set1_epi16(1);
        let mut sum_acc = _mm256_setzero_si256();
        let mut sq_acc = _mm256_setzero_si256();
        for i in 0..chunks {
            let bytes = _mm_loadu_si128(x.as_ptr().add(i * 16).cast());
            let v = _mm256_cvtepu8_epi16(bytes);
            sum_acc = _mm256_add_epi32(sum_acc, _mm256_madd_epi16(v, ones));
            sq_acc = _mm256_add_epi32(sq_acc, _mm256_madd_epi16(v, v));
        }
        (
            i64::from(crate::simd::hsum_epi32_256(sum_acc)),
            i64::from(crate::simd::hsum_epi32_256(sq_acc)),
        )
    };

    for &q in &x[chunks * 16..] {
        let v = i64::from(q);
        sum += v;
        sq_sum += v * v;
    }
    (sum, sq_sum)
}

/// AVX2 statistics pass for signed bytes
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn row_sums_i8_avx2(x: &[i8]) -> (i64, i64) {
    #[allow(clippy::wildcard_imports)]
    use std::arch::x86_64::*;

    let chunks = x.len() / 16;

    // SAFETY: AVX2 verified by the caller; loads stay within `x`
    let (mut sum, mut sq_sum) = unsafe {
        let ones = _mm256_set1_epi16(1);
        let mut sum_acc = _mm256_setzero_si256();
        let mut sq_acc = _mm256_setzero_si256();
        for i in 0..chunks {
            let bytes = _mm_loadu_si128(x.as_ptr().add(i * 16).cast());
            let v = _mm256_cvtepi8_epi16(bytes);
            sum_acc = _mm256_add_epi32(sum_acc, _mm256_madd_epi16(v, ones));
            sq_acc = _mm256_add_epi32(sq_acc, _mm256_madd_epi16(v, v));
        }
        (
            i64::from(crate::simd::hsum_epi32_256(sum_acc)),
            i64::from(crate::simd::hsum_epi32_256(sq_acc)),
        )
    };

    for &q in &x[chunks * 16..] {
        let v = i64::from(q);
        sum += v;
        sq_sum += v * v;
    }
    (sum, sq_sum)
}

/// AVX2 normalization pass for unsigned bytes
///
/// The affine transform is folded into two lane constants before the loop:
///
/// ```text
/// center = zero_point + mean / scale      (the mean in the quantized domain)
/// gain   = scale * inv_std
/// val    = (q - center) * gain * weight + bias
/// ```
///
/// Subtracting in the quantized domain keeps flat rows exactly at zero in
/// f32 and bounds the f32 error well under one quantization step; rounding
/// and saturation go through the scalar quantize primitive from a stored
/// lane array. May differ from the f64 scalar path by one step.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn normalize_row_u8_avx2(
    x: &[u8],
    y: &mut [u8],
    mean: f64,
    inv_std: f64,
    weight: &[f32],
    bias: &[f32],
    input: QuantParams,
    output_inv_scale: f64,
    output_zero_point: i64,
) {
    #[allow(clippy::wildcard_imports)]
    use std::arch::x86_64::*;

    let chunks = x.len() / 8;

    // SAFETY: AVX2+FMA verified by the caller; loads stay within the row
    unsafe {
        let center = _mm256_set1_ps((input.zero_point as f64 + mean / input.scale) as f32);
        let gain = _mm256_set1_ps((input.scale * inv_std) as f32);

        for i in 0..chunks {
            let off = i * 8;
            let bytes = _mm_loadl_epi64(x.as_ptr().add(off).cast());
            let v = _mm256_cvtepi32_ps(_mm256_cvtepu8_epi32(bytes));

            let w = _mm256_loadu_ps(weight.as_ptr().add(off));
            let b = _mm256_loadu_ps(bias.as_ptr().add(off));
            let norm = _mm256_mul_ps(_mm256_sub_ps(v, center), gain);
            let val = _mm256_fmadd_ps(norm, w, b);

            let mut vals = [0.0f32; 8];
            _mm256_storeu_ps(vals.as_mut_ptr(), val);
            for (k, &value) in vals.iter().enumerate() {
                y[off + k] = quantize(f64::from(value), output_inv_scale, output_zero_point);
            }
        }
    }

    for j in chunks * 8..x.len() {
        let real = dequantize(x[j], input.scale, input.zero_point);
        let val = (real - mean) * inv_std * f64::from(weight[j]) + f64::from(bias[j]);
        y[j] = quantize(val, output_inv_scale, output_zero_point);
    }
}

/// AVX2 normalization pass for signed bytes
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn normalize_row_i8_avx2(
    x: &[i8],
    y: &mut [i8],
    mean: f64,
    inv_std: f64,
    weight: &[f32],
    bias: &[f32],
    input: QuantParams,
    output_inv_scale: f64,
    output_zero_point: i64,
) {
    #[allow(clippy::wildcard_imports)]
    use std::arch::x86_64::*;

    let chunks = x.len() / 8;

    // SAFETY: AVX2+FMA verified by the caller; loads stay within the row
    unsafe {
        let center = _mm256_set1_ps((input.zero_point as f64 + mean / input.scale) as f32);
        let gain = _mm256_set1_ps((input.scale * inv_std) as f32);

        for i in 0..chunks {
            let off = i * 8;
            let bytes = _mm_loadl_epi64(x.as_ptr().add(off).cast());
            let v = _mm256_cvtepi32_ps(_mm256_cvtepi8_epi32(bytes));

            let w = _mm256_loadu_ps(weight.as_ptr().add(off));
            let b = _mm256_loadu_ps(bias.as_ptr().add(off));
            let norm = _mm256_mul_ps(_mm256_sub_ps(v, center), gain);
            let val = _mm256_fmadd_ps(norm, w, b);

            let mut vals = [0.0f32; 8];
            _mm256_storeu_ps(vals.as_mut_ptr(), val);
            for (k, &value) in vals.iter().enumerate() {
                y[off + k] = quantize(f64::from(value), output_inv_scale, output_zero_point);
            }
        }
    }

    for j in chunks * 8..x.len() {
        let real = dequantize(x[j], input.scale, input.zero_point);
        let val = (real - mean) * inv_std * f64::from(weight[j]) + f64::from(bias[j]);
        y[j] = quantize(val, output_inv_scale, output_zero_point);
    }
}

// ============================================================================
// Per-width row kernels
// ============================================================================

/// Row kernel selection per element width
///
/// The 8-bit widths dispatch to AVX2 when available; the 16-bit widths use
/// the shared scalar path. The implementing set mirrors the supported
/// element types, keeping every instantiation type-pure.
trait RowKernel: QuantElem {
    /// Raw (uncorrected) integer row sums: `(Σ q_j, Σ q_j²)`
    fn row_sums(x: &[Self]) -> (i64, i64);

    /// Dequantize, normalize, and requantize one row
    fn normalize_row(
        x: &[Self],
        y: &mut [Self],
        mean: f64,
        inv_std: f64,
        weight: &[f32],
        bias: &[f32],
        input: QuantParams,
        output_inv_scale: f64,
        output_zero_point: i64,
    );
}

macro_rules! impl_row_kernel_scalar {
    ($ty:ty) => {
        impl RowKernel for $ty {
            fn row_sums(x: &[Self]) -> (i64, i64) {
                row_sums_scalar(x)
            }

            fn normalize_row(
                x: &[Self],
                y: &mut [Self],
                mean: f64,
                inv_std: f64,
                weight: &[f32],
                bias: &[f32],
                input: QuantParams,
                output_inv_scale: f64,
                output_zero_point: i64,
            ) {
                normalize_row_scalar(
                    x,
                    y,
                    mean,
                    inv_std,
                    weight,
                    bias,
                    input,
                    output_inv_scale,
                    output_zero_point,
                );
            }
        }
    };
}

macro_rules! impl_row_kernel_avx2 {
    ($ty:ty, $sums_avx2:ident, $normalize_avx2:ident) => {
        impl RowKernel for $ty {
            fn row_sums(x: &[Self]) -> (i64, i64) {
                #[cfg(target_arch = "x86_64")]
                {
                    if x.len() >= 16
                        && x.len() <= SIMD_ROW_LIMIT
                        && is_x86_feature_detected!("avx2")
                    {
                        // SAFETY: AVX2 verified at runtime
                        return unsafe { $sums_avx2(x) };
                    }
                }
                row_sums_scalar(x)
            }

            fn normalize_row(
                x: &[Self],
                y: &mut [Self],
                mean: f64,
                inv_std: f64,
                weight: &[f32],
                bias: &[f32],
                input: QuantParams,
                output_inv_scale: f64,
                output_zero_point: i64,
            ) {
                #[cfg(target_arch = "x86_64")]
                {
                    if x.len() >= 8
                        && is_x86_feature_detected!("avx2")
                        && is_x86_feature_detected!("fma")
                    {
                        // SAFETY: AVX2+FMA verified at runtime
                        unsafe {
                            $normalize_avx2(
                                x,
                                y,
                                mean,
                                inv_std,
                                weight,
                                bias,
                                input,
                                output_inv_scale,
                                output_zero_point,
                            );
                        }
                        return;
                    }
                }
                normalize_row_scalar(
                    x,
                    y,
                    mean,
                    inv_std,
                    weight,
                    bias,
                    input,
                    output_inv_scale,
                    output_zero_point,
                );
            }
        }
    };
}

impl_row_kernel_avx2!(u8, row_sums_u8_avx2, normalize_row_u8_avx2);
impl_row_kernel_avx2!(i8, row_sums_i8_avx2, normalize_row_i8_avx2);
impl_row_kernel_scalar!(i16);
impl_row_kernel_scalar!(u16);

// ============================================================================
// Typed kernel and dispatch
// ============================================================================

/// Both passes over one row: statistics, then normalization
fn normalize_one_row<T: RowKernel>(
    x: &[T],
    y: &mut [T],
    weight: &[f32],
    bias: &[f32],
    input: QuantParams,
    eps: f64,
    output_inv_scale: f64,
    output_zero_point: i64,
) {
    let (sum, sq_sum) = T::row_sums(x);
    let (mean, inv_std) = row_moments(sum, sq_sum, x.len(), input, eps);
    T::normalize_row(
        x,
        y,
        mean,
        inv_std,
        weight,
        bias,
        input,
        output_inv_scale,
        output_zero_point,
    );
}

/// Type-pure layer normalization over every row of a tensor
///
/// Rows write disjoint output slices, so the parallel path needs no
/// synchronization; below the threshold a serial loop avoids scheduling
/// overhead. Each element of the output is written exactly once.
fn layer_norm_typed<T: RowKernel + num_traits::Num>(
    input: &Tensor<T>,
    in_params: QuantParams,
    weight: &Tensor<f32>,
    bias: &Tensor<f32>,
    eps: f64,
    out_params: QuantParams,
    out: &mut Tensor<T>,
) {
    assert_eq!(
        input.shape(),
        out.shape(),
        "quantized_layer_norm: input and output shapes must match"
    );
    let last_dim = input.last_dim();
    assert_eq!(
        weight.size(),
        last_dim,
        "quantized_layer_norm: weight length must equal the trailing dimension"
    );
    assert_eq!(
        bias.size(),
        last_dim,
        "quantized_layer_norm: bias length must equal the trailing dimension"
    );
    assert!(
        eps.is_finite() && eps > 0.0,
        "quantized_layer_norm: eps must be positive and finite, got {eps}"
    );
    assert!(
        in_params.scale.is_finite() && in_params.scale > 0.0,
        "quantized_layer_norm: input scale must be positive and finite, got {}",
        in_params.scale
    );
    assert!(
        out_params.scale.is_finite() && out_params.scale > 0.0,
        "quantized_layer_norm: output scale must be positive and finite, got {}",
        out_params.scale
    );

    let leading_dims = input.leading_dims();
    let output_inv_scale = out_params.scale.recip();
    let w = weight.data();
    let b = bias.data();
    let in_data = input.data();
    let out_data = out.data_mut();

    if leading_dims >= PAR_ROW_THRESHOLD {
        out_data
            .par_chunks_mut(last_dim)
            .zip(in_data.par_chunks(last_dim))
            .for_each(|(y, x)| {
                normalize_one_row(
                    x,
                    y,
                    w,
                    b,
                    in_params,
                    eps,
                    output_inv_scale,
                    out_params.zero_point,
                );
            });
    } else {
        for (y, x) in out_data.chunks_mut(last_dim).zip(in_data.chunks(last_dim)) {
            normalize_one_row(
                x,
                y,
                w,
                b,
                in_params,
                eps,
                output_inv_scale,
                out_params.zero_point,
            );
        }
    }
}

/// Quantized layer normalization with scalar quantization parameters
///
/// Normalizes `input` along its trailing dimension and writes the
/// requantized result into `out`, which must have the same shape and
/// element type as `input`. The input is assumed per-tensor quantized: one
/// `(scale, zero_point)` pair covers every row.
///
/// `normalized_shape` is accepted for interface compatibility and must name
/// the trailing dimension; reduction over any other axis is unsupported.
///
/// # Arguments
///
/// * `input` - Quantized input tensor
/// * `input_scale` - Input quantization scale
/// * `input_zero_point` - Input quantization zero point
/// * `normalized_shape` - Must equal `[input.last_dim()]`
/// * `weight` - Scale parameter (gamma), one value per position along the axis
/// * `bias` - Shift parameter (beta), one value per position along the axis
/// * `eps` - Small positive constant added to the variance
/// * `output_scale` - Output quantization scale
/// * `output_zero_point` - Output quantization zero point
/// * `out` - Output tensor, written in place
///
/// # Panics
///
/// Panics if the input and output dtypes differ, the shapes differ,
/// `weight` or `bias` length doesn't match the trailing dimension,
/// `normalized_shape` doesn't name the trailing dimension, or `eps` is not
/// a positive finite value. Continuing under any of these conditions would
/// silently corrupt numeric results.
///
/// # Examples
///
/// ```
/// use normalizar::{QTensor, Tensor};
/// use normalizar::layer_norm::quantized_layer_norm_per_tensor;
///
/// let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![10u8, 10, 10, 10]).unwrap());
/// let weight = Tensor::from_vec(vec![4], vec![1.0f32; 4]).unwrap();
/// let bias = Tensor::from_vec(vec![4], vec![0.0f32; 4]).unwrap();
/// let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, 4]).unwrap());
///
/// quantized_layer_norm_per_tensor(
///     &input, 1.0, 0, &[4], &weight, &bias, 1e-5, 1.0, 128, &mut out,
/// );
///
/// // A flat row normalizes to zero, which requantizes to the zero point
/// let QTensor::QUInt8(result) = out else { unreachable!() };
/// assert_eq!(result.data(), &[128, 128, 128, 128]);
/// ```
pub fn quantized_layer_norm_per_tensor(
    input: &QTensor,
    input_scale: f64,
    input_zero_point: i64,
    normalized_shape: &[usize],
    weight: &Tensor<f32>,
    bias: &Tensor<f32>,
    eps: f64,
    output_scale: f64,
    output_zero_point: i64,
    out: &mut QTensor,
) {
    assert_eq!(
        normalized_shape,
        [input.last_dim()],
        "quantized_layer_norm: normalization is supported over the trailing dimension only"
    );

    let in_params = QuantParams::new(input_scale, input_zero_point);
    let out_params = QuantParams::new(output_scale, output_zero_point);

    match (input, out) {
        (QTensor::QInt8(x), QTensor::QInt8(y)) => {
            layer_norm_typed(x, in_params, weight, bias, eps, out_params, y);
        }
        (QTensor::QUInt8(x), QTensor::QUInt8(y)) => {
            layer_norm_typed(x, in_params, weight, bias, eps, out_params, y);
        }
        (QTensor::QInt16(x), QTensor::QInt16(y)) => {
            layer_norm_typed(x, in_params, weight, bias, eps, out_params, y);
        }
        (QTensor::QUInt16(x), QTensor::QUInt16(y)) => {
            layer_norm_typed(x, in_params, weight, bias, eps, out_params, y);
        }
        (x, y) => panic!(
            "quantized_layer_norm: unhandled dtype combination (input {}, output {})",
            x.dtype(),
            y.dtype()
        ),
    }
}

/// Quantized layer normalization with tensor-wrapped quantization parameters
///
/// Variant of [`quantized_layer_norm_per_tensor`] taking the input scale and
/// zero point as single-element tensors. The pair is extracted exactly once,
/// before any statistics work, and the two call shapes produce identical
/// output for the same logical values.
///
/// # Arguments
///
/// * `input` - Quantized input tensor
/// * `input_scale` - Single-element tensor holding the input scale
/// * `input_zero_point` - Single-element tensor holding the input zero point
/// * `normalized_shape` - Must equal `[input.last_dim()]`
/// * `weight` - Scale parameter (gamma), one value per position along the axis
/// * `bias` - Shift parameter (beta), one value per position along the axis
/// * `eps` - Small positive constant added to the variance
/// * `output_scale` - Output quantization scale
/// * `output_zero_point` - Output quantization zero point
/// * `out` - Output tensor, written in place
///
/// # Panics
///
/// Panics under the same contract violations as
/// [`quantized_layer_norm_per_tensor`].
pub fn quantized_layer_norm(
    input: &QTensor,
    input_scale: &Tensor<f32>,
    input_zero_point: &Tensor<i64>,
    normalized_shape: &[usize],
    weight: &Tensor<f32>,
    bias: &Tensor<f32>,
    eps: f64,
    output_scale: f64,
    output_zero_point: i64,
    out: &mut QTensor,
) {
    let params = QuantParams::from_tensors(input_scale, input_zero_point);
    quantized_layer_norm_per_tensor(
        input,
        params.scale,
        params.zero_point,
        normalized_shape,
        weight,
        bias,
        eps,
        output_scale,
        output_zero_point,
        out,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine_ones(n: usize) -> (Tensor<f32>, Tensor<f32>) {
        let weight = Tensor::from_vec(vec![n], vec![1.0f32; n]).expect("weight");
        let bias = Tensor::from_vec(vec![n], vec![0.0f32; n]).expect("bias");
        (weight, bias)
    }

    fn run_u8(
        shape: Vec<usize>,
        data: Vec<u8>,
        input: QuantParams,
        eps: f64,
        output: QuantParams,
    ) -> Vec<u8> {
        let n = shape[shape.len() - 1];
        let (weight, bias) = affine_ones(n);
        let input_t = QTensor::from(Tensor::from_vec(shape.clone(), data).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(shape).expect("output"));
        quantized_layer_norm_per_tensor(
            &input_t,
            input.scale,
            input.zero_point,
            &[n],
            &weight,
            &bias,
            eps,
            output.scale,
            output.zero_point,
            &mut out,
        );
        let QTensor::QUInt8(t) = out else {
            unreachable!()
        };
        t.data().to_vec()
    }

    #[test]
    fn test_flat_row_maps_to_output_zero_point() {
        // Flat row: every element equals the mean, so the normalized value
        // is zero everywhere and requantizes to the output zero point.
        let result = run_u8(
            vec![1, 4],
            vec![10, 10, 10, 10],
            QuantParams::new(1.0, 0),
            1e-5,
            QuantParams::new(1.0, 128),
        );
        assert_eq!(result, vec![128, 128, 128, 128]);
    }

    #[test]
    fn test_flat_row_independent_of_eps() {
        for eps in [1e-9, 1e-5, 0.1, 10.0] {
            let result = run_u8(
                vec![1, 4],
                vec![42, 42, 42, 42],
                QuantParams::new(1.0, 0),
                eps,
                QuantParams::new(1.0, 128),
            );
            assert_eq!(result, vec![128, 128, 128, 128], "eps={eps}");
        }
    }

    #[test]
    fn test_row_sums_concrete() {
        let (sum, sq_sum) = <u8 as RowKernel>::row_sums(&[0u8, 255]);
        assert_eq!(sum, 255);
        assert_eq!(sq_sum, 65025);
    }

    #[test]
    fn test_row_moments_matches_direct_float_computation() {
        // Row [0, 255] with scale 1.0, zero point 0: mean 127.5,
        // population variance 16256.25
        let x = [0u8, 255];
        let params = QuantParams::new(1.0, 0);
        let eps = 1e-5;

        let (sum, sq_sum) = <u8 as RowKernel>::row_sums(&x);
        let (mean, inv_std) = row_moments(sum, sq_sum, x.len(), params, eps);

        // Direct computation on the dequantized row
        let reals: Vec<f64> = x
            .iter()
            .map(|&q| dequantize(q, params.scale, params.zero_point))
            .collect();
        let direct_mean: f64 = reals.iter().sum::<f64>() / reals.len() as f64;
        let direct_var: f64 =
            reals.iter().map(|r| (r - direct_mean).powi(2)).sum::<f64>() / reals.len() as f64;

        assert!((mean - direct_mean).abs() / direct_mean.abs() < 1e-3);
        assert!((mean - 127.5).abs() < 1e-9);

        let direct_inv_std = 1.0 / (direct_var + eps).sqrt();
        assert!((inv_std - direct_inv_std).abs() / direct_inv_std < 1e-3);
        assert!((direct_var - 16256.25).abs() < 1e-9);
    }

    #[test]
    fn test_row_moments_zero_point_correction() {
        // q = [5, 7] with zp 6, scale 2: reals [-2, 2], mean 0, variance 4
        let x = [5u8, 7];
        let params = QuantParams::new(2.0, 6);
        let (sum, sq_sum) = <u8 as RowKernel>::row_sums(&x);
        let (mean, inv_std) = row_moments(sum, sq_sum, x.len(), params, 1e-5);
        assert!(mean.abs() < 1e-12);
        assert!((inv_std - 1.0 / (4.0f64 + 1e-5).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_eps_added_before_square_root() {
        // Zero variance: inv_std must be 1/sqrt(eps), not 1/sqrt(0) + eps
        let x = [9u8; 4];
        let (sum, sq_sum) = <u8 as RowKernel>::row_sums(&x);
        let (_, inv_std) = row_moments(sum, sq_sum, x.len(), QuantParams::new(1.0, 0), 1e-5);
        assert!((inv_std - 316.227_766).abs() < 1e-3);
    }

    #[test]
    fn test_simd_row_sums_match_scalar() {
        // Integer sums are exact in both paths, so equality is bitwise
        for len in [1, 7, 15, 16, 17, 31, 64, 100, 255] {
            let xu: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            assert_eq!(
                <u8 as RowKernel>::row_sums(&xu),
                row_sums_scalar(&xu),
                "u8 len={len}"
            );

            let xi: Vec<i8> = (0..len).map(|i| ((i * 53 % 256) as i32 - 128) as i8).collect();
            assert_eq!(
                <i8 as RowKernel>::row_sums(&xi),
                row_sums_scalar(&xi),
                "i8 len={len}"
            );
        }
    }

    #[test]
    fn test_simd_normalize_within_one_step_of_scalar() {
        let len = 67;
        let x: Vec<u8> = (0..len).map(|i| (i * 11 % 256) as u8).collect();
        let weight: Vec<f32> = (0..len).map(|i| 0.5 + i as f32 * 0.01).collect();
        let bias: Vec<f32> = (0..len).map(|i| -1.0 + i as f32 * 0.05).collect();
        let input = QuantParams::new(0.1, 3);
        let eps = 1e-5;

        let (sum, sq_sum) = row_sums_scalar(&x);
        let (mean, inv_std) = row_moments(sum, sq_sum, len, input, eps);

        let mut y_dispatch = vec![0u8; len];
        <u8 as RowKernel>::normalize_row(
            &x, &mut y_dispatch, mean, inv_std, &weight, &bias, input, 2.0, 128,
        );

        let mut y_scalar = vec![0u8; len];
        normalize_row_scalar(
            &x, &mut y_scalar, mean, inv_std, &weight, &bias, input, 2.0, 128,
        );

        for j in 0..len {
            let diff = (i32::from(y_dispatch[j]) - i32::from(y_scalar[j])).abs();
            assert!(
                diff <= 1,
                "position {j}: dispatch={} scalar={}",
                y_dispatch[j],
                y_scalar[j]
            );
        }
    }

    #[test]
    fn test_determinism() {
        let data: Vec<u8> = (0..512).map(|i| (i * 31 % 256) as u8).collect();
        let first = run_u8(
            vec![8, 64],
            data.clone(),
            QuantParams::new(0.05, 17),
            1e-5,
            QuantParams::new(0.1, 128),
        );
        let second = run_u8(
            vec![8, 64],
            data,
            QuantParams::new(0.05, 17),
            1e-5,
            QuantParams::new(0.1, 128),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_shape_preservation_across_ranks() {
        for shape in [vec![6], vec![2, 3], vec![1, 2, 3]] {
            let size: usize = shape.iter().product();
            let n = shape[shape.len() - 1];
            let data: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
            let (weight, bias) = affine_ones(n);
            let input = QTensor::from(Tensor::from_vec(shape.clone(), data).expect("input"));
            let mut out = QTensor::from(Tensor::<u8>::zeros(shape.clone()).expect("output"));
            quantized_layer_norm_per_tensor(
                &input, 1.0, 0, &[n], &weight, &bias, 1e-5, 1.0, 128, &mut out,
            );
            assert_eq!(out.shape(), shape.as_slice());
        }
    }

    #[test]
    fn test_saturation_never_wraps() {
        // A large gamma pushes every non-mean element far outside the
        // output range; results must clamp to the boundaries.
        let n = 4;
        let weight = Tensor::from_vec(vec![n], vec![1e9f32; n]).expect("weight");
        let bias = Tensor::from_vec(vec![n], vec![0.0f32; n]).expect("bias");
        let input =
            QTensor::from(Tensor::from_vec(vec![1, n], vec![0u8, 0, 255, 255]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, n]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[n], &weight, &bias, 1e-5, 1.0, 128, &mut out,
        );
        let QTensor::QUInt8(t) = out else {
            unreachable!()
        };
        assert_eq!(t.data(), &[0, 0, 255, 255]);
    }

    #[test]
    fn test_saturation_signed_output() {
        let n = 2;
        let weight = Tensor::from_vec(vec![n], vec![1e9f32; n]).expect("weight");
        let bias = Tensor::from_vec(vec![n], vec![0.0f32; n]).expect("bias");
        let input =
            QTensor::from(Tensor::from_vec(vec![1, n], vec![-100i8, 100]).expect("input"));
        let mut out = QTensor::from(Tensor::<i8>::zeros(vec![1, n]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[n], &weight, &bias, 1e-5, 1.0, 0, &mut out,
        );
        let QTensor::QInt8(t) = out else {
            unreachable!()
        };
        assert_eq!(t.data(), &[-128, 127]);
    }

    #[test]
    fn test_scalar_and_tensor_variants_agree() {
        let shape = vec![4, 16];
        let data: Vec<u8> = (0..64).map(|i| (i * 13 % 256) as u8).collect();
        let n = 16;
        let (weight, bias) = affine_ones(n);

        let input = QTensor::from(Tensor::from_vec(shape.clone(), data).expect("input"));
        let mut out_scalar = QTensor::from(Tensor::<u8>::zeros(shape.clone()).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 0.25, 12, &[n], &weight, &bias, 1e-5, 0.5, 100, &mut out_scalar,
        );

        let scale_t = Tensor::from_vec(vec![1], vec![0.25f32]).expect("scale");
        let zp_t = Tensor::from_vec(vec![1], vec![12i64]).expect("zp");
        let mut out_tensor = QTensor::from(Tensor::<u8>::zeros(shape).expect("output"));
        quantized_layer_norm(
            &input, &scale_t, &zp_t, &[n], &weight, &bias, 1e-5, 0.5, 100, &mut out_tensor,
        );

        let QTensor::QUInt8(a) = out_scalar else {
            unreachable!()
        };
        let QTensor::QUInt8(b) = out_tensor else {
            unreachable!()
        };
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_flat_rows_all_widths() {
        // Flat rows requantize to the output zero point for every width
        let n = 4;
        let (weight, bias) = affine_ones(n);

        let cases: Vec<(QTensor, QTensor, i64)> = vec![
            (
                Tensor::from_vec(vec![1, n], vec![-5i8; n]).expect("input").into(),
                QTensor::from(Tensor::<i8>::zeros(vec![1, n]).expect("output")),
                -64,
            ),
            (
                Tensor::from_vec(vec![1, n], vec![5u8; n]).expect("input").into(),
                QTensor::from(Tensor::<u8>::zeros(vec![1, n]).expect("output")),
                128,
            ),
            (
                Tensor::from_vec(vec![1, n], vec![-500i16; n]).expect("input").into(),
                QTensor::from(Tensor::<i16>::zeros(vec![1, n]).expect("output")),
                1000,
            ),
            (
                Tensor::from_vec(vec![1, n], vec![500u16; n]).expect("input").into(),
                QTensor::from(Tensor::<u16>::zeros(vec![1, n]).expect("output")),
                30000,
            ),
        ];

        for (input, mut out, out_zp) in cases {
            quantized_layer_norm_per_tensor(
                &input, 1.0, 0, &[n], &weight, &bias, 1e-5, 1.0, out_zp, &mut out,
            );
            let expected = out_zp;
            match out {
                QTensor::QInt8(t) => assert!(t.data().iter().all(|&v| i64::from(v) == expected)),
                QTensor::QUInt8(t) => assert!(t.data().iter().all(|&v| i64::from(v) == expected)),
                QTensor::QInt16(t) => assert!(t.data().iter().all(|&v| i64::from(v) == expected)),
                QTensor::QUInt16(t) => assert!(t.data().iter().all(|&v| i64::from(v) == expected)),
            }
        }
    }

    #[test]
    fn test_parallel_rows_match_single_row_calls() {
        // 64 rows exceed the parallel threshold; each row must equal the
        // result of normalizing it alone (serial path).
        let rows = 64;
        let n = 16;
        let data: Vec<u8> = (0..rows * n).map(|i| (i * 29 % 256) as u8).collect();
        let batched = run_u8(
            vec![rows, n],
            data.clone(),
            QuantParams::new(0.1, 7),
            1e-5,
            QuantParams::new(0.2, 128),
        );

        for r in 0..rows {
            let row = data[r * n..(r + 1) * n].to_vec();
            let single = run_u8(
                vec![1, n],
                row,
                QuantParams::new(0.1, 7),
                1e-5,
                QuantParams::new(0.2, 128),
            );
            assert_eq!(&batched[r * n..(r + 1) * n], single.as_slice(), "row {r}");
        }
    }

    #[test]
    fn test_normalization_shifts_toward_output_range() {
        // Two-element row [0, 255]: after normalization the low element
        // sits one standard deviation below the mean and the high element
        // one above, so with unit output scale and zero point 128 the
        // outputs land symmetrically around 128.
        let result = run_u8(
            vec![1, 2],
            vec![0, 255],
            QuantParams::new(1.0, 0),
            1e-5,
            QuantParams::new(1.0, 128),
        );
        assert_eq!(result, vec![127, 129]);
    }

    #[test]
    #[should_panic(expected = "unhandled dtype combination")]
    fn test_dtype_mismatch_panics() {
        let (weight, bias) = affine_ones(4);
        let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![0u8; 4]).expect("input"));
        let mut out = QTensor::from(Tensor::<i8>::zeros(vec![1, 4]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[4], &weight, &bias, 1e-5, 1.0, 0, &mut out,
        );
    }

    #[test]
    #[should_panic(expected = "shapes must match")]
    fn test_shape_mismatch_panics() {
        let (weight, bias) = affine_ones(4);
        let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![0u8; 4]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![2, 4]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[4], &weight, &bias, 1e-5, 1.0, 0, &mut out,
        );
    }

    #[test]
    #[should_panic(expected = "weight length")]
    fn test_weight_length_mismatch_panics() {
        let weight = Tensor::from_vec(vec![3], vec![1.0f32; 3]).expect("weight");
        let bias = Tensor::from_vec(vec![4], vec![0.0f32; 4]).expect("bias");
        let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![0u8; 4]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, 4]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[4], &weight, &bias, 1e-5, 1.0, 0, &mut out,
        );
    }

    #[test]
    #[should_panic(expected = "trailing dimension only")]
    fn test_normalized_shape_mismatch_panics() {
        let (weight, bias) = affine_ones(4);
        let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![0u8; 4]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, 4]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[8], &weight, &bias, 1e-5, 1.0, 0, &mut out,
        );
    }

    #[test]
    #[should_panic(expected = "eps must be positive")]
    fn test_zero_eps_panics() {
        let (weight, bias) = affine_ones(4);
        let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![0u8; 4]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, 4]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[4], &weight, &bias, 0.0, 1.0, 0, &mut out,
        );
    }

    #[test]
    #[should_panic(expected = "eps must be positive")]
    fn test_nan_eps_panics() {
        let (weight, bias) = affine_ones(4);
        let input = QTensor::from(Tensor::from_vec(vec![1, 4], vec![0u8; 4]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, 4]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[4], &weight, &bias, f64::NAN, 1.0, 0, &mut out,
        );
    }

    #[test]
    fn test_weight_and_bias_are_applied() {
        // Row [0, 2] with scale 1, zp 0: mean 1, variance 1.
        // Normalized: [-1, 1]. With weight [3, 3] and bias [10, 10] the
        // pre-quantization values are [7, 13].
        let n = 2;
        let weight = Tensor::from_vec(vec![n], vec![3.0f32; n]).expect("weight");
        let bias = Tensor::from_vec(vec![n], vec![10.0f32; n]).expect("bias");
        let input = QTensor::from(Tensor::from_vec(vec![1, n], vec![0u8, 2]).expect("input"));
        let mut out = QTensor::from(Tensor::<u8>::zeros(vec![1, n]).expect("output"));
        quantized_layer_norm_per_tensor(
            &input, 1.0, 0, &[n], &weight, &bias, 1e-9, 1.0, 0, &mut out,
        );
        let QTensor::QUInt8(t) = out else {
            unreachable!()
        };
        assert_eq!(t.data(), &[7, 13]);
    }
}
