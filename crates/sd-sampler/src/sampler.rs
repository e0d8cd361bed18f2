use sd_tensor::{Result, Tensor, TensorError};

use crate::temperature::TemperatureFilter;
use crate::top_k::TopKFilter;
use crate::top_p::TopPFilter;

/// Trait for filters that rewrite one row of logits in place.
///
/// A filter never removes entries; tokens it rules out are set to
/// [`NEG_INF`](crate::NEG_INF) so row widths stay fixed across a batch.
pub trait LogitsFilter: Send + Sync {
    /// Returns the name of this filter.
    fn name(&self) -> &str;

    /// Modify one row of logits in place.
    fn apply(&self, row: &mut [f32]);
}

/// Composes multiple filters into a pipeline, applied in insertion order.
pub struct FilterChain {
    filters: Vec<Box<dyn LogitsFilter>>,
}

impl FilterChain {
    /// Create a new empty filter chain.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Add a filter to the end of the chain. Returns self for builder-style usage.
    pub fn with(mut self, filter: Box<dyn LogitsFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Builds the standard chain: temperature, then top-k, then top-p.
    ///
    /// Each stage is skipped when its parameter leaves logits untouched
    /// (`temperature == 1.0`, `topk == 0`, `topp == 0.0`).
    pub fn from_params(temperature: f32, topk: usize, topp: f32) -> Self {
        let mut chain = Self::new();
        if temperature != 1.0 {
            chain = chain.with(Box::new(TemperatureFilter::new(temperature)));
        }
        if topk > 0 {
            chain = chain.with(Box::new(TopKFilter::new(topk)));
        }
        if topp > 0.0 {
            chain = chain.with(Box::new(TopPFilter::new(topp)));
        }
        chain
    }

    /// Names of the filters in application order.
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter over a single row.
    pub fn apply_row(&self, row: &mut [f32]) {
        for filter in &self.filters {
            filter.apply(row);
        }
    }

    /// Run every filter over each row of a `[rows, vocab]` f32 tensor.
    pub fn apply(&self, logits: &mut Tensor) -> Result<()> {
        if logits.shape().ndim() != 2 {
            return Err(TensorError::Other(format!(
                "logits must be [rows, vocab], got shape {}",
                logits.shape()
            )));
        }
        let vocab = logits.shape().dim(1);
        if vocab == 0 || self.filters.is_empty() {
            return Ok(());
        }
        for row in logits.data_f32_mut()?.chunks_mut(vocab) {
            self.apply_row(row);
        }
        Ok(())
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}
