use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends (CPU, accelerators, etc.).
///
/// All operations work on row-major f32 slices made of rows of `n_cols`
/// elements (typically one row per batch entry and one column per
/// vocabulary id). Data is passed in as slices and returned as owned
/// vectors.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Softmax over rows of `n_cols` elements.
    ///
    /// For each row: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n_cols: usize) -> Result<Vec<f32>>;

    /// Log-softmax over rows of `n_cols` elements.
    ///
    /// For each row: result[i] = x[i] - max(x) - ln(sum(exp(x[j] - max(x))))
    fn log_softmax(&self, x: &[f32], n_cols: usize) -> Result<Vec<f32>>;

    /// Row-wise top-k selection.
    ///
    /// Returns `(values, indices)`, each of length `rows * k`, where the k
    /// entries of a row are ordered by descending value. Equal values are
    /// ordered by ascending column index, so the lower index wins a tie.
    fn top_k(&self, x: &[f32], n_cols: usize, k: usize) -> Result<(Vec<f32>, Vec<usize>)>;
}
