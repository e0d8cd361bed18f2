use sd_tensor::cpu::{rank_order, softmax_row};

use crate::sampler::LogitsFilter;
use crate::NEG_INF;

/// Nucleus filtering: keeps the smallest set of highest-probability tokens
/// whose cumulative probability reaches the threshold `p`.
///
/// Every token whose logit is below the logit of the first token that makes
/// the cumulative mass reach `p` is masked to [`NEG_INF`]. `p == 0`
/// disables the filter.
pub struct TopPFilter {
    p: f32,
}

impl TopPFilter {
    /// Create a new top-p (nucleus) filter with the given probability threshold.
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl LogitsFilter for TopPFilter {
    fn name(&self) -> &str {
        "top_p"
    }

    fn apply(&self, row: &mut [f32]) {
        if row.is_empty() || self.p <= 0.0 {
            return;
        }

        // Sort descending by logit value.
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_unstable_by(|&a, &b| rank_order(row, a, b));
        let sorted: Vec<f32> = order.iter().map(|&i| row[i]).collect();
        let probs = softmax_row(&sorted);

        // Number of leading tokens whose cumulative mass is still below p;
        // the next one crosses the threshold and is the last one kept.
        let mut cumulative = 0.0f32;
        let mut below = 0;
        for &prob in &probs {
            cumulative += prob;
            if cumulative < self.p {
                below += 1;
            } else {
                break;
            }
        }
        let cutoff = sorted[below.min(sorted.len() - 1)];

        for logit in row.iter_mut() {
            if *logit < cutoff {
                *logit = NEG_INF;
            }
        }
    }
}
