//! Tensor implementation
//!
//! This module provides the core `Tensor` type, an N-dimensional array with
//! owned, contiguous, row-major storage. The normalization kernel treats an
//! input tensor as read-only and an output tensor as write-only; it never
//! reallocates or reshapes either one.

use std::fmt;

use num_traits::Num;
use serde::{Deserialize, Serialize};

use crate::error::{NormalizarError, Result};

/// N-dimensional tensor with contiguous row-major storage
///
/// Shapes are validated at construction: a tensor always has rank >= 1 and
/// every dimension is positive, so the trailing dimension (the normalization
/// axis) is never empty.
///
/// # Examples
///
/// ```
/// use normalizar::Tensor;
///
/// let t = Tensor::from_vec(vec![2, 3], vec![
///     1.0, 2.0, 3.0,
///     4.0, 5.0, 6.0,
/// ]).unwrap();
///
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.ndim(), 2);
/// assert_eq!(t.size(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<T: Num> {
    /// Flattened data in row-major order
    data: Vec<T>,
    /// Shape of the tensor
    shape: Vec<usize>,
}

impl<T: Num + Clone> Tensor<T> {
    /// Create a new tensor from a vector and shape
    ///
    /// # Arguments
    ///
    /// * `shape` - Dimensions of the tensor
    /// * `data` - Flattened data in row-major order
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - Shape is empty
    /// - Shape contains zero
    /// - Data size doesn't match shape
    ///
    /// # Examples
    ///
    /// ```
    /// use normalizar::Tensor;
    ///
    /// let t = Tensor::from_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    /// assert_eq!(t.shape(), &[2, 2]);
    /// ```
    pub fn from_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        if shape.is_empty() {
            return Err(NormalizarError::InvalidShape {
                reason: "Shape cannot be empty".to_string(),
            });
        }

        if shape.contains(&0) {
            return Err(NormalizarError::InvalidShape {
                reason: "Shape dimensions cannot be zero".to_string(),
            });
        }

        let expected_size: usize = shape.iter().product();
        if data.len() != expected_size {
            return Err(NormalizarError::InvalidShape {
                reason: format!(
                    "Data size {} doesn't match shape {:?} (expected {})",
                    data.len(),
                    shape,
                    expected_size
                ),
            });
        }

        Ok(Self { data, shape })
    }

    /// Create a tensor of the given shape filled with zeros
    ///
    /// # Errors
    ///
    /// Returns `Err` if the shape is empty or contains zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use normalizar::Tensor;
    ///
    /// let t = Tensor::<u8>::zeros(vec![2, 4]).unwrap();
    /// assert_eq!(t.size(), 8);
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let size: usize = shape.iter().product();
        Self::from_vec(shape, vec![T::zero(); size])
    }

    /// Get the shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the total number of elements
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get a reference to the underlying data
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Length of the trailing dimension
    ///
    /// The trailing dimension is the normalization axis: statistics are
    /// computed over contiguous slices of this length.
    #[must_use]
    pub fn last_dim(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    /// Product of all dimensions except the last
    ///
    /// Visualizing the tensor as a set of 1-d rows, this is the row count.
    /// A rank-1 tensor has exactly one row.
    #[must_use]
    pub fn leading_dims(&self) -> usize {
        self.shape[..self.shape.len() - 1].iter().product()
    }
}

impl<T: Num + fmt::Debug> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={:?})", self.shape)
    }
}
