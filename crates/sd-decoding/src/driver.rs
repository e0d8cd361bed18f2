use std::cmp::Ordering;

use sd_sampler::{CategoricalSampler, RngKey, TokenSampler};
use sd_tensor::{ComputeBackend, CpuBackend, Shape, Tensor};
use tracing::debug;

use crate::beam::flat_batch_beam_expand;
use crate::cache::{cache_map, Cache};
use crate::config::SamplingConfig;
use crate::error::{DecodeError, Result};
use crate::output::DecodeOutput;
use crate::sampling::{token_dims, SamplingLoop};
use crate::step::StepFn;

/// Temperature sampling with top-k / top-p filtering.
///
/// Decodes `config.num_decodes` independent trials of every row of
/// `inputs` (`[batch, length]` u32, start slot in column 0, forced prompt
/// tokens from column 1) and returns them sorted by log-probability,
/// worst first. Draws are reproducible for a given `seed`.
pub fn sample_decode<S: StepFn + ?Sized>(
    inputs: &Tensor,
    cache: Cache,
    step_fn: &mut S,
    eos_id: u32,
    seed: u64,
    config: &SamplingConfig,
    initial_index: Option<&[usize]>,
) -> Result<DecodeOutput> {
    let mut sampler = CategoricalSampler::new();
    sample_decode_with(
        inputs,
        cache,
        step_fn,
        eos_id,
        RngKey::new(seed),
        config,
        initial_index,
        &mut sampler,
        &CpuBackend::new(),
    )
}

/// [`sample_decode`] with an explicit key, token sampler and backend.
#[allow(clippy::too_many_arguments)]
pub fn sample_decode_with<S: StepFn + ?Sized>(
    inputs: &Tensor,
    cache: Cache,
    step_fn: &mut S,
    eos_id: u32,
    key: RngKey,
    config: &SamplingConfig,
    initial_index: Option<&[usize]>,
    sampler: &mut dyn TokenSampler,
    backend: &dyn ComputeBackend,
) -> Result<DecodeOutput> {
    config.validate()?;
    let (batch, len) = token_dims(inputs)?;
    let n = config.num_decodes;
    debug!(
        batch,
        num_decodes = n,
        length = len,
        temperature = config.temperature,
        topk = config.topk,
        topp = config.topp,
        "sample_decode"
    );

    let expanded_inputs = flat_batch_beam_expand(inputs, n)?;
    let expanded_index: Option<Vec<usize>> = match initial_index {
        Some(idx) if idx.len() != batch => {
            return Err(DecodeError::shape("initial_index", &[batch], &[idx.len()]))
        }
        Some(idx) => Some(
            idx.iter()
                .flat_map(|&i| std::iter::repeat(i).take(n))
                .collect(),
        ),
        None => None,
    };
    // Trials that start from different positions need their own cache index.
    cache.check_rows(batch, initial_index.is_some())?;
    let expanded_cache = cache_map(
        |t| flat_batch_beam_expand(t, n),
        &cache,
        initial_index.is_some(),
    )?;

    let decode = SamplingLoop::new(
        &expanded_inputs,
        expanded_cache,
        eos_id,
        key,
        config,
        expanded_index.as_deref(),
    )?;
    let (sequences, log_probs) = decode.run(step_fn, sampler, backend)?;
    sort_trials(&sequences, &log_probs, batch, n)
}

/// Groups `[batch * n, length]` trial results by batch row and sorts each
/// group by ascending score.
pub(crate) fn sort_trials(
    sequences: &Tensor,
    scores: &[f32],
    batch: usize,
    n: usize,
) -> Result<DecodeOutput> {
    if scores.len() != batch * n {
        return Err(DecodeError::shape("trial scores", &[batch * n], &[scores.len()]));
    }
    let len = sequences.shape().dims().get(1).copied().unwrap_or(0);

    let mut order = Vec::with_capacity(batch * n);
    for b in 0..batch {
        let mut trials: Vec<usize> = (b * n..(b + 1) * n).collect();
        trials.sort_by(|&x, &y| scores[x].partial_cmp(&scores[y]).unwrap_or(Ordering::Equal));
        order.extend(trials);
    }

    let sorted = sequences
        .gather_rows(&order)?
        .reshape(Shape::new(vec![batch, n, len]))?;
    let sorted_scores: Vec<f32> = order.iter().map(|&i| scores[i]).collect();
    Ok(DecodeOutput::new(
        sorted,
        Tensor::new(sorted_scores, Shape::new(vec![batch, n])),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sort_trials() {
        let sequences = Tensor::from_u32(
            vec![
                5, 1, 4, 4, 5, 1, 5, 5, 5, 1, 3, 3, //
                8, 7, 5, 5, 8, 7, 3, 3, 8, 7, 4, 4,
            ],
            Shape::new(vec![6, 4]),
        );
        let scores = [-2.3, -1.3, -3.6, -0.5, -2.5, -1.9];
        let out = sort_trials(&sequences, &scores, 2, 3).unwrap();
        assert_eq!(out.sequences.shape().dims(), &[2, 3, 4]);
        assert_eq!(
            out.sequences.data_u32().unwrap(),
            &[
                5, 1, 3, 3, 5, 1, 4, 4, 5, 1, 5, 5, //
                8, 7, 3, 3, 8, 7, 4, 4, 8, 7, 5, 5,
            ]
        );
        let expected: [f32; 6] = [-3.6, -2.3, -1.3, -2.5, -1.9, -0.5];
        for (a, b) in out.scores.data_f32().unwrap().iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn test_sort_trials_is_stable() {
        let sequences = Tensor::from_u32(vec![1, 2, 3], Shape::new(vec![3, 1]));
        let out = sort_trials(&sequences, &[0.0, -1.0, 0.0], 1, 3).unwrap();
        assert_eq!(out.sequences.data_u32().unwrap(), &[2, 1, 3]);
    }
}
