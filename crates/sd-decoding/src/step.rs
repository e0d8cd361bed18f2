use sd_tensor::{DType, Tensor};

use crate::cache::Cache;
use crate::error::{DecodeError, Result};

/// What the decoding loops hand to the step function on every call.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Current token of every row, i.e. the token at that row's position.
    pub tokens: &'a [u32],
    /// Position (column of `sequences`) each token was read from.
    pub positions: &'a [usize],
    /// Full token buffer, `[rows, length + 1]` u32 with the leading start
    /// slot in column 0.
    pub sequences: &'a Tensor,
}

impl StepInput<'_> {
    /// Number of rows in this call.
    pub fn rows(&self) -> usize {
        self.tokens.len()
    }
}

/// The model side of decoding: maps the current tokens and cache to
/// next-token logits and an updated cache.
///
/// Implementations must return `[rows, vocab]` f32 (or f16) logits with
/// one row per input row, and a cache with the same nested structure as
/// the one they were given.
pub trait StepFn {
    fn step(&mut self, input: StepInput<'_>, cache: Cache) -> Result<(Tensor, Cache)>;
}

impl<T: StepFn + ?Sized> StepFn for &mut T {
    fn step(&mut self, input: StepInput<'_>, cache: Cache) -> Result<(Tensor, Cache)> {
        (**self).step(input, cache)
    }
}

/// A [`StepFn`] backed by a closure, see [`fn_step`].
pub struct FnStep<F> {
    f: F,
}

impl<F> StepFn for FnStep<F>
where
    F: FnMut(StepInput<'_>, Cache) -> Result<(Tensor, Cache)>,
{
    fn step(&mut self, input: StepInput<'_>, cache: Cache) -> Result<(Tensor, Cache)> {
        (self.f)(input, cache)
    }
}

/// Wraps a closure as a [`StepFn`].
pub fn fn_step<F>(f: F) -> FnStep<F>
where
    F: FnMut(StepInput<'_>, Cache) -> Result<(Tensor, Cache)>,
{
    FnStep { f }
}

/// Calls `step_fn` and checks its results against the call contract.
///
/// Returns f32 logits of shape `[rows, vocab]`.
pub(crate) fn call_step<S: StepFn + ?Sized>(
    step_fn: &mut S,
    input: StepInput<'_>,
    cache: Cache,
) -> Result<(Tensor, Cache)> {
    let rows = input.rows();
    let layout = cache.layout();
    let (logits, new_cache) = step_fn.step(input, cache)?;

    let dims = logits.shape().dims();
    if dims.len() != 2 || dims[0] != rows || dims[1] == 0 {
        return Err(DecodeError::shape("step function logits [rows, vocab]", &[rows], dims));
    }
    if new_cache.layout() != layout {
        return Err(DecodeError::CacheStructure(
            "step function returned a cache with a different structure".to_string(),
        ));
    }

    let logits = match logits.dtype() {
        DType::F32 => logits,
        DType::F16 => Tensor::new(logits.to_f32_vec(), logits.shape().clone()),
        DType::U32 => {
            return Err(DecodeError::StepFunction(
                "logits must be floating point, got u32".to_string(),
            ))
        }
    };
    Ok((logits, new_cache))
}
