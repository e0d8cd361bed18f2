use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Create a shape from a slice of dimensions.
    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    /// The rank-0 shape of a scalar.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of the leading (batch) dimension, or `None` for scalars.
    pub fn leading_dim(&self) -> Option<usize> {
        self.dims.first().copied()
    }

    /// Returns a copy of this shape with the leading dimension replaced.
    pub fn with_leading_dim(&self, n: usize) -> Result<Shape> {
        if self.dims.is_empty() {
            return Err(TensorError::InvalidAxis { axis: 0, ndim: 0 });
        }
        let mut dims = self.dims.clone();
        dims[0] = n;
        Ok(Shape::new(dims))
    }

    /// Splits the leading dimension `d0` into `[outer, d0 / outer]`.
    pub fn split_leading(&self, outer: usize) -> Result<Shape> {
        let d0 = self
            .leading_dim()
            .ok_or(TensorError::InvalidAxis { axis: 0, ndim: 0 })?;
        if outer == 0 || d0 % outer != 0 {
            return Err(TensorError::Other(format!(
                "cannot split leading dimension {} into {} groups",
                d0, outer
            )));
        }
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(outer);
        dims.push(d0 / outer);
        dims.extend_from_slice(&self.dims[1..]);
        Ok(Shape::new(dims))
    }

    /// Merges the first two dimensions `[d0, d1, ...]` into `[d0 * d1, ...]`.
    pub fn merge_leading(&self) -> Result<Shape> {
        if self.dims.len() < 2 {
            return Err(TensorError::InvalidAxis {
                axis: 1,
                ndim: self.dims.len(),
            });
        }
        let mut dims = Vec::with_capacity(self.dims.len() - 1);
        dims.push(self.dims[0] * self.dims[1]);
        dims.extend_from_slice(&self.dims[2..]);
        Ok(Shape::new(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}
