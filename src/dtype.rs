//! Fixed-point element types and runtime dispatch
//!
//! Every quantized tensor carries a [`DType`] tag naming its fixed-point
//! element width. The set of supported widths is closed: dispatch is an
//! exhaustive match over [`QTensor`] variants, so an unknown element type is
//! unrepresentable and a mismatched input/output pairing is a fatal
//! contract violation rather than a silent fallback.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

/// Enum of all supported fixed-point element types
///
/// Stored alongside every quantized tensor so operations can dispatch to
/// the matching typed kernel at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Signed 8-bit fixed point
    QInt8,
    /// Unsigned 8-bit fixed point
    QUInt8,
    /// Signed 16-bit fixed point
    QInt16,
    /// Unsigned 16-bit fixed point
    QUInt16,
}

impl DType {
    /// Size of one element in bytes
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::QInt8 | DType::QUInt8 => 1,
            DType::QInt16 | DType::QUInt16 => 2,
        }
    }

    /// Whether this element type is signed
    #[must_use]
    pub fn is_signed(&self) -> bool {
        matches!(self, DType::QInt8 | DType::QInt16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::QInt8 => "qint8",
            DType::QUInt8 => "quint8",
            DType::QInt16 => "qint16",
            DType::QUInt16 => "quint16",
        };
        write!(f, "{s}")
    }
}

/// Trait implemented by Rust types that can store a fixed-point element
///
/// This is the bridge between Rust's type system and the runtime [`DType`]
/// tag, and the monomorphization seam for the kernel: each instantiation is
/// specialized to one element width with no per-element branching on type.
/// The implementing set is closed and mirrors the [`DType`] variants.
pub trait QuantElem: Copy + Send + Sync + 'static {
    /// The corresponding [`DType`] tag
    const DTYPE: DType;
    /// Smallest representable value, widened to i64
    const MIN: i64;
    /// Largest representable value, widened to i64
    const MAX: i64;

    /// Widen this element to i64 for integer accumulation
    fn to_i64(self) -> i64;

    /// Narrow an i64 to this element type, clamping to the representable
    /// range (saturation, never wrapping)
    fn from_i64_clamped(v: i64) -> Self;
}

macro_rules! impl_quant_elem {
    ($ty:ty, $dtype:expr) => {
        impl QuantElem for $ty {
            const DTYPE: DType = $dtype;
            const MIN: i64 = <$ty>::MIN as i64;
            const MAX: i64 = <$ty>::MAX as i64;

            #[inline]
            fn to_i64(self) -> i64 {
                i64::from(self)
            }

            #[inline]
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn from_i64_clamped(v: i64) -> Self {
                v.clamp(<Self as QuantElem>::MIN, <Self as QuantElem>::MAX) as $ty
            }
        }
    };
}

impl_quant_elem!(i8, DType::QInt8);
impl_quant_elem!(u8, DType::QUInt8);
impl_quant_elem!(i16, DType::QInt16);
impl_quant_elem!(u16, DType::QUInt16);

/// Quantized tensor: a closed tagged union over the supported element widths
///
/// Operations dispatch by matching on the variant, which keeps the hot
/// loops type-pure. Pairings outside the supported set cannot be expressed;
/// a dtype mismatch between an operation's input and output tensors panics.
///
/// # Examples
///
/// ```
/// use normalizar::{DType, QTensor, Tensor};
///
/// let t = QTensor::from(Tensor::from_vec(vec![2, 4], vec![0u8; 8]).unwrap());
/// assert_eq!(t.dtype(), DType::QUInt8);
/// assert_eq!(t.shape(), &[2, 4]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QTensor {
    /// Signed 8-bit tensor
    QInt8(Tensor<i8>),
    /// Unsigned 8-bit tensor
    QUInt8(Tensor<u8>),
    /// Signed 16-bit tensor
    QInt16(Tensor<i16>),
    /// Unsigned 16-bit tensor
    QUInt16(Tensor<u16>),
}

impl QTensor {
    /// The element type tag of this tensor
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            QTensor::QInt8(_) => DType::QInt8,
            QTensor::QUInt8(_) => DType::QUInt8,
            QTensor::QInt16(_) => DType::QInt16,
            QTensor::QUInt16(_) => DType::QUInt16,
        }
    }

    /// Shape of the underlying tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            QTensor::QInt8(t) => t.shape(),
            QTensor::QUInt8(t) => t.shape(),
            QTensor::QInt16(t) => t.shape(),
            QTensor::QUInt16(t) => t.shape(),
        }
    }

    /// Number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            QTensor::QInt8(t) => t.size(),
            QTensor::QUInt8(t) => t.size(),
            QTensor::QInt16(t) => t.size(),
            QTensor::QUInt16(t) => t.size(),
        }
    }

    /// Length of the trailing dimension (the normalization axis)
    #[must_use]
    pub fn last_dim(&self) -> usize {
        match self {
            QTensor::QInt8(t) => t.last_dim(),
            QTensor::QUInt8(t) => t.last_dim(),
            QTensor::QInt16(t) => t.last_dim(),
            QTensor::QUInt16(t) => t.last_dim(),
        }
    }
}

impl From<Tensor<i8>> for QTensor {
    fn from(t: Tensor<i8>) -> Self {
        QTensor::QInt8(t)
    }
}

impl From<Tensor<u8>> for QTensor {
    fn from(t: Tensor<u8>) -> Self {
        QTensor::QUInt8(t)
    }
}

impl From<Tensor<i16>> for QTensor {
    fn from(t: Tensor<i16>) -> Self {
        QTensor::QInt16(t)
    }
}

impl From<Tensor<u16>> for QTensor {
    fn from(t: Tensor<u16>) -> Self {
        QTensor::QUInt16(t)
    }
}
