use sd_tensor::cpu::{rank_order, top_k_indices};
use sd_tensor::{CpuStorage, Result, Shape, Tensor, TensorError};

use crate::sampler::LogitsFilter;
use crate::NEG_INF;

/// Vocabulary width from which [`TopKFilter`] selects in two stages.
pub const TWO_STAGE_MIN_VOCAB: usize = 32_768;

/// Number of contiguous chunks each row is split into by the two-stage
/// selection.
pub const TWO_STAGE_CHUNKS: usize = 128;

/// Keeps the K highest logits of a row and masks the rest to [`NEG_INF`].
///
/// The cutoff is the K-th largest value; entries tied with it survive.
/// `k == 0` disables the filter.
pub struct TopKFilter {
    k: usize,
}

impl TopKFilter {
    /// Create a new top-K filter that retains the `k` highest-logit tokens.
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl LogitsFilter for TopKFilter {
    fn name(&self) -> &str {
        "top_k"
    }

    fn apply(&self, row: &mut [f32]) {
        if self.k == 0 || self.k >= row.len() {
            return;
        }
        let top = if row.len() >= TWO_STAGE_MIN_VOCAB {
            top_k_row_two_stage(row, self.k, TWO_STAGE_CHUNKS)
        } else {
            top_k_indices(row, self.k)
        };
        let Some(&last) = top.last() else {
            return;
        };
        let cutoff = row[last];
        for logit in row.iter_mut() {
            if *logit < cutoff {
                *logit = NEG_INF;
            }
        }
    }
}

/// Top-k of one row computed chunk by chunk.
///
/// The row is cut into `num_chunks` contiguous chunks; the exact top-k of
/// every chunk is collected and the top-k of that reduced candidate set is
/// returned. Per-chunk selection keeps every element that could rank in
/// the row's top-k, so the result equals an exact top-k, ties included.
fn top_k_row_two_stage(row: &[f32], k: usize, num_chunks: usize) -> Vec<usize> {
    let width = row.len().div_ceil(num_chunks.max(1)).max(1);
    let mut candidates: Vec<usize> = Vec::with_capacity(num_chunks * k);
    for (c, chunk) in row.chunks(width).enumerate() {
        let offset = c * width;
        candidates.extend(top_k_indices(chunk, k).into_iter().map(|i| i + offset));
    }
    candidates.sort_unstable_by(|&a, &b| rank_order(row, a, b));
    candidates.truncate(k);
    candidates
}

/// Two-stage row-wise top-k of a `[rows, vocab]` f32 tensor.
///
/// Returns `(values, indices)`, an f32 and a u32 tensor of shape `[rows, k]`,
/// each row ordered by descending value with lower indices first on ties.
pub fn top_k_two_stage(x: &Tensor, k: usize) -> Result<(Tensor, Tensor)> {
    if x.shape().ndim() != 2 {
        return Err(TensorError::Other(format!(
            "top_k_two_stage: expected [rows, vocab], got shape {}",
            x.shape()
        )));
    }
    let (rows, vocab) = (x.shape().dim(0), x.shape().dim(1));
    if k > vocab {
        return Err(TensorError::TopKTooLarge { k, width: vocab });
    }
    let data = x.data_f32()?;
    let mut values = Vec::with_capacity(rows * k);
    let mut indices = Vec::with_capacity(rows * k);
    if vocab > 0 {
        for row in data.chunks(vocab) {
            for i in top_k_row_two_stage(row, k, TWO_STAGE_CHUNKS) {
                values.push(row[i]);
                indices.push(i as u32);
            }
        }
    }
    let shape = Shape::new(vec![rows, k]);
    Ok((
        Tensor::from_storage(CpuStorage::from_f32_vec(values), shape.clone())?,
        Tensor::from_storage(CpuStorage::from_u32_vec(indices), shape)?,
    ))
}
