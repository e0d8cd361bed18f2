use rand::distributions::{Distribution, WeightedIndex};
use sd_tensor::cpu::argmax;
use sd_tensor::{ComputeBackend, CpuBackend, Result, Tensor, TensorError};
use tracing::trace;

use crate::rng::RngKey;

/// Draws one token id per row of a `[rows, vocab]` logits tensor.
///
/// Implementations must be deterministic in `key`: the same key and logits
/// always yield the same tokens.
pub trait TokenSampler {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Sample one token per row.
    fn sample(&mut self, key: RngKey, logits: &Tensor) -> Result<Vec<u32>>;
}

/// Distribution-based sampler: converts logits to probabilities via softmax,
/// then samples each row from the resulting distribution using a generator
/// seeded from the step key.
pub struct CategoricalSampler {
    backend: Box<dyn ComputeBackend>,
}

impl CategoricalSampler {
    /// Create a categorical sampler on the CPU backend.
    pub fn new() -> Self {
        Self::with_backend(Box::new(CpuBackend::new()))
    }

    /// Create a categorical sampler computing softmax on `backend`.
    pub fn with_backend(backend: Box<dyn ComputeBackend>) -> Self {
        Self { backend }
    }
}

impl Default for CategoricalSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSampler for CategoricalSampler {
    fn name(&self) -> &str {
        "categorical"
    }

    fn sample(&mut self, key: RngKey, logits: &Tensor) -> Result<Vec<u32>> {
        if logits.shape().ndim() != 2 || logits.shape().dim(1) == 0 {
            return Err(TensorError::Other(format!(
                "categorical: logits must be [rows, vocab] with vocab > 0, got shape {}",
                logits.shape()
            )));
        }
        let vocab = logits.shape().dim(1);
        let data = logits.data_f32()?;
        let probs = self.backend.softmax(data, vocab)?;

        let mut rng = key.to_rng();
        let mut tokens = Vec::with_capacity(data.len() / vocab);
        for (row, p) in data.chunks(vocab).zip(probs.chunks(vocab)) {
            let token = match WeightedIndex::new(p) {
                Ok(dist) => dist.sample(&mut rng),
                Err(_) => {
                    // Fallback: pick the highest logit if weights are invalid.
                    trace!("categorical: invalid weights, falling back to argmax");
                    argmax(row).unwrap_or(0)
                }
            };
            tokens.push(token as u32);
        }
        Ok(tokens)
    }
}
