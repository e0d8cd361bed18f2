use half::f16;

use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage.
///
/// Each variant owns a contiguous, row-major element buffer. Row operations
/// treat the buffer as `rows` consecutive slices of `row_len` elements and
/// work identically for every element type.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuStorage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// 16-bit floating point storage.
    F16(Vec<f16>),
    /// Unsigned 32-bit integer storage.
    U32(Vec<u32>),
}

/// Applies `$body` to the inner vector of any variant, rewrapping the result
/// in the same variant.
macro_rules! map_variant {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            CpuStorage::F32($v) => CpuStorage::F32($body),
            CpuStorage::F16($v) => CpuStorage::F16($body),
            CpuStorage::U32($v) => CpuStorage::U32($body),
        }
    };
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F16(v) => v.len(),
            CpuStorage::U32(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        match self {
            CpuStorage::F32(v) => Ok(v.as_slice()),
            other => Err(dtype_mismatch(DType::F32, other.dtype())),
        }
    }

    /// Returns the data as a mutable f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            CpuStorage::F32(v) => Ok(v.as_mut_slice()),
            other => Err(dtype_mismatch(DType::F32, other.dtype())),
        }
    }

    /// Returns the data as a u32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not U32.
    pub fn as_u32_slice(&self) -> Result<&[u32]> {
        match self {
            CpuStorage::U32(v) => Ok(v.as_slice()),
            other => Err(dtype_mismatch(DType::U32, other.dtype())),
        }
    }

    /// Returns the data as a mutable u32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not U32.
    pub fn as_u32_slice_mut(&mut self) -> Result<&mut [u32]> {
        match self {
            CpuStorage::U32(v) => Ok(v.as_mut_slice()),
            other => Err(dtype_mismatch(DType::U32, other.dtype())),
        }
    }

    /// Returns the data as an f16 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F16.
    pub fn as_f16_slice(&self) -> Result<&[f16]> {
        match self {
            CpuStorage::F16(v) => Ok(v.as_slice()),
            other => Err(dtype_mismatch(DType::F16, other.dtype())),
        }
    }

    /// Converts every element to f32, whatever the stored type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            CpuStorage::F32(v) => v.clone(),
            CpuStorage::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            CpuStorage::U32(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Create zero-filled storage for the given dtype and element count.
    pub fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::F32 => CpuStorage::F32(vec![0.0; n]),
            DType::F16 => CpuStorage::F16(vec![f16::ZERO; n]),
            DType::U32 => CpuStorage::U32(vec![0; n]),
        }
    }

    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }

    /// Create storage from an f16 vector.
    pub fn from_f16_vec(data: Vec<f16>) -> Self {
        CpuStorage::F16(data)
    }

    /// Create storage from a u32 vector.
    pub fn from_u32_vec(data: Vec<u32>) -> Self {
        CpuStorage::U32(data)
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::U32(_) => DType::U32,
        }
    }

    /// Repeats each of the `rows` rows `times` times, contiguously.
    ///
    /// Rows `[a, b]` with `times = 2` become `[a, a, b, b]`.
    pub fn repeat_rows(&self, rows: usize, times: usize) -> Result<CpuStorage> {
        let row_len = self.row_len(rows)?;
        Ok(map_variant!(self, v => repeat_rows_of(v.as_slice(), row_len, times)))
    }

    /// Builds new storage whose row `j` is row `indices[j]` of this storage.
    ///
    /// # Errors
    /// Returns an error if any index is `>= rows`.
    pub fn gather_rows(&self, rows: usize, indices: &[usize]) -> Result<CpuStorage> {
        let row_len = self.row_len(rows)?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= rows) {
            return Err(TensorError::RowOutOfBounds { index: bad, rows });
        }
        Ok(map_variant!(self, v => gather_rows_of(v.as_slice(), row_len, indices)))
    }

    fn row_len(&self, rows: usize) -> Result<usize> {
        if rows == 0 || self.len() % rows != 0 {
            return Err(TensorError::Other(format!(
                "storage of {} elements cannot be split into {} rows",
                self.len(),
                rows
            )));
        }
        Ok(self.len() / rows)
    }
}

fn dtype_mismatch(expected: DType, got: DType) -> TensorError {
    TensorError::DTypeMismatch {
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

fn repeat_rows_of<T: Copy>(data: &[T], row_len: usize, times: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(data.len() * times);
    if row_len == 0 {
        return out;
    }
    for row in data.chunks(row_len) {
        for _ in 0..times {
            out.extend_from_slice(row);
        }
    }
    out
}

fn gather_rows_of<T: Copy>(data: &[T], row_len: usize, indices: &[usize]) -> Vec<T> {
    let mut out = Vec::with_capacity(indices.len() * row_len);
    for &i in indices {
        out.extend_from_slice(&data[i * row_len..(i + 1) * row_len]);
    }
    out
}
