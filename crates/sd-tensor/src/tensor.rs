use half::f16;

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A tensor backed by CPU storage.
///
/// Holds contiguous, row-major data with an associated shape. The leading
/// dimension is treated as the batch (row) dimension by the row operations
/// that move data between flat-batch and batch x beam layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        Self::from_storage(CpuStorage::from_f32_vec(data), shape)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    /// Create a new tensor from u32 data (token ids, positions) and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn from_u32(data: Vec<u32>, shape: Shape) -> Self {
        Self::from_storage(CpuStorage::from_u32_vec(data), shape)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    /// Create a new tensor from f16 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn from_f16(data: Vec<f16>, shape: Shape) -> Self {
        Self::from_storage(CpuStorage::from_f16_vec(data), shape)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    /// Create a tensor from existing storage, checking the element count.
    pub fn from_storage(storage: CpuStorage, shape: Shape) -> Result<Self> {
        if storage.len() != shape.numel() {
            return Err(TensorError::Other(format!(
                "data length {} does not match shape {} (numel={})",
                storage.len(),
                shape,
                shape.numel()
            )));
        }
        Ok(Tensor { storage, shape })
    }

    /// Create a zero-filled f32 tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        Self::zeros_of(DType::F32, shape)
    }

    /// Create a zero-filled tensor of the given dtype and shape.
    pub fn zeros_of(dtype: DType, shape: Shape) -> Self {
        Tensor {
            storage: CpuStorage::zeros(dtype, shape.numel()),
            shape,
        }
    }

    /// Create a rank-0 f32 tensor.
    pub fn scalar(value: f32) -> Self {
        Tensor {
            storage: CpuStorage::from_f32_vec(vec![value]),
            shape: Shape::scalar(),
        }
    }

    /// Create a rank-0 u32 tensor.
    pub fn scalar_u32(value: u32) -> Self {
        Tensor {
            storage: CpuStorage::from_u32_vec(vec![value]),
            shape: Shape::scalar(),
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data_f32(&self) -> Result<&[f32]> {
        self.storage.as_f32_slice()
    }

    /// Returns the underlying data as a mutable f32 slice.
    pub fn data_f32_mut(&mut self) -> Result<&mut [f32]> {
        self.storage.as_f32_slice_mut()
    }

    /// Returns the underlying data as a u32 slice.
    pub fn data_u32(&self) -> Result<&[u32]> {
        self.storage.as_u32_slice()
    }

    /// Returns the underlying data as a mutable u32 slice.
    pub fn data_u32_mut(&mut self) -> Result<&mut [u32]> {
        self.storage.as_u32_slice_mut()
    }

    /// Copies the elements out as f32, whatever the stored type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.storage.to_f32_vec()
    }

    /// Size of the leading dimension, or `None` for scalars.
    pub fn rows(&self) -> Option<usize> {
        self.shape.leading_dim()
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
        })
    }

    /// Repeats every slice along the leading dimension `times` times,
    /// contiguously: `[d0, ...]` becomes `[d0 * times, ...]`.
    pub fn repeat_rows(&self, times: usize) -> Result<Tensor> {
        let rows = self.leading_rows()?;
        let storage = self.storage.repeat_rows(rows, times)?;
        Ok(Tensor {
            storage,
            shape: self.shape.with_leading_dim(rows * times)?,
        })
    }

    /// Selects slices along the leading dimension: row `j` of the result is
    /// row `indices[j]` of `self`.
    pub fn gather_rows(&self, indices: &[usize]) -> Result<Tensor> {
        let rows = self.leading_rows()?;
        let storage = self.storage.gather_rows(rows, indices)?;
        Ok(Tensor {
            storage,
            shape: self.shape.with_leading_dim(indices.len())?,
        })
    }

    /// Applies `f` to every element of a floating point tensor, keeping the
    /// dtype.
    ///
    /// # Errors
    /// Returns an error for integer tensors.
    pub fn map_f32<F>(&self, f: F) -> Result<Tensor>
    where
        F: Fn(f32) -> f32,
    {
        let storage = match &self.storage {
            CpuStorage::F32(v) => CpuStorage::F32(v.iter().map(|&x| f(x)).collect()),
            CpuStorage::F16(v) => CpuStorage::F16(
                v.iter()
                    .map(|&x| f16::from_f32(f(x.to_f32())))
                    .collect(),
            ),
            CpuStorage::U32(_) => {
                return Err(TensorError::DTypeMismatch {
                    expected: "float".to_string(),
                    got: DType::U32.to_string(),
                })
            }
        };
        Ok(Tensor {
            storage,
            shape: self.shape.clone(),
        })
    }

    fn leading_rows(&self) -> Result<usize> {
        self.shape.leading_dim().ok_or(TensorError::InvalidAxis {
            axis: 0,
            ndim: self.shape.ndim(),
        })
    }
}
