pub mod select;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

pub use select::{argmax, rank_order, top_k_indices};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Softmax of a single row, numerically stabilised by the row maximum.
///
/// Finite sentinel logits (large negative values) map to probability ~0
/// without producing NaN; a row made only of sentinels becomes uniform.
pub fn softmax_row(row: &[f32]) -> Vec<f32> {
    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out: Vec<f32> = row.iter().map(|&v| (v - max_val).exp()).collect();
    let sum: f32 = out.iter().sum();
    if sum > 0.0 {
        for p in out.iter_mut() {
            *p /= sum;
        }
    }
    out
}

/// Log-softmax of a single row.
pub fn log_softmax_row(row: &[f32]) -> Vec<f32> {
    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|&v| (v - max_val).exp()).sum();
    let log_sum = sum.ln();
    row.iter().map(|&v| (v - max_val) - log_sum).collect()
}

fn check_rows(op: &str, x: &[f32], n_cols: usize) -> Result<()> {
    if n_cols == 0 {
        return Err(TensorError::Other(format!("{}: n_cols must be > 0", op)));
    }
    if x.len() % n_cols != 0 {
        return Err(TensorError::Other(format!(
            "{}: x.len()={} is not a multiple of n_cols={}",
            op,
            x.len(),
            n_cols
        )));
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn softmax(&self, x: &[f32], n_cols: usize) -> Result<Vec<f32>> {
        check_rows("softmax", x, n_cols)?;
        Ok(x.chunks(n_cols).flat_map(softmax_row).collect())
    }

    fn log_softmax(&self, x: &[f32], n_cols: usize) -> Result<Vec<f32>> {
        check_rows("log_softmax", x, n_cols)?;
        Ok(x.chunks(n_cols).flat_map(log_softmax_row).collect())
    }

    fn top_k(&self, x: &[f32], n_cols: usize, k: usize) -> Result<(Vec<f32>, Vec<usize>)> {
        check_rows("top_k", x, n_cols)?;
        if k > n_cols {
            return Err(TensorError::TopKTooLarge { k, width: n_cols });
        }
        let n_rows = x.len() / n_cols;
        let mut values = Vec::with_capacity(n_rows * k);
        let mut indices = Vec::with_capacity(n_rows * k);
        for row in x.chunks(n_cols) {
            for i in top_k_indices(row, k) {
                values.push(row[i]);
                indices.push(i);
            }
        }
        Ok((values, indices))
    }
}
