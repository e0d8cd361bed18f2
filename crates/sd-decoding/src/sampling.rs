//! Single-trial temperature sampling as an explicit state machine.
//!
//! Token buffers use the shifted-right convention: column 0 of every row
//! is the start slot and forced prompt tokens begin at column 1. The loop
//! works on the input extended by one trailing pad column; a row at
//! position `i` feeds the token in column `i` to the step function and
//! writes its next token to column `i + 1`.

use std::mem;

use sd_sampler::{FilterChain, RngKey, TokenSampler};
use sd_tensor::{ComputeBackend, DType, Shape, Tensor};
use tracing::{debug, trace};

use crate::cache::Cache;
use crate::config::SamplingConfig;
use crate::error::{DecodeError, Result};
use crate::step::{call_step, StepFn, StepInput};
use crate::PAD_ID;

/// Decode state for one batch of independent rows.
pub struct SamplingLoop {
    /// Extended token buffer, `rows * width`.
    sequences: Vec<u32>,
    rows: usize,
    width: usize,
    /// Column each row reads from on the next step.
    cursors: Vec<usize>,
    /// Last column each row may write.
    limits: Vec<usize>,
    ended: Vec<bool>,
    log_probs: Vec<f32>,
    key: RngKey,
    cache: Cache,
    filters: FilterChain,
    eos_id: u32,
    steps: usize,
}

impl SamplingLoop {
    /// Prepares a decode of `inputs` (`[rows, length]` u32).
    ///
    /// `initial_index` gives the starting column of every row and defaults
    /// to 0. `config.num_decodes` is ignored: every row is one trial.
    pub fn new(
        inputs: &Tensor,
        cache: Cache,
        eos_id: u32,
        key: RngKey,
        config: &SamplingConfig,
        initial_index: Option<&[usize]>,
    ) -> Result<Self> {
        config.validate()?;
        let (rows, len) = token_dims(inputs)?;
        cache.check_rows(rows, false)?;
        let data = inputs.data_u32()?;
        let width = len + 1;

        let cursors = match initial_index {
            Some(idx) if idx.len() != rows => {
                return Err(DecodeError::shape("initial_index", &[rows], &[idx.len()]))
            }
            Some(idx) => {
                if let Some(&bad) = idx.iter().find(|&&i| i > len) {
                    return Err(DecodeError::InvalidConfig(format!(
                        "initial_index {} exceeds sequence length {}",
                        bad, len
                    )));
                }
                idx.to_vec()
            }
            None => vec![0; rows],
        };

        let mut sequences = Vec::with_capacity(rows * width);
        let mut limits = Vec::with_capacity(rows);
        for r in 0..rows {
            let row = &data[r * len..(r + 1) * len];
            sequences.extend_from_slice(row);
            sequences.push(PAD_ID);
            let limit = match config.max_decode_steps {
                Some(steps) => {
                    let last_forced = row.iter().rposition(|&t| t != PAD_ID).unwrap_or(0);
                    (last_forced.max(cursors[r]) + steps).min(len)
                }
                None => len,
            };
            limits.push(limit);
        }
        let ended = cursors
            .iter()
            .zip(limits.iter())
            .map(|(&c, &l)| c >= l)
            .collect();

        Ok(Self {
            sequences,
            rows,
            width,
            cursors,
            limits,
            ended,
            log_probs: vec![0.0; rows],
            key,
            cache,
            filters: FilterChain::from_params(config.temperature, config.topk, config.topp),
            eos_id,
            steps: 0,
        })
    }

    /// True once every row has ended.
    pub fn is_finished(&self) -> bool {
        self.ended.iter().all(|&e| e)
    }

    /// Number of step-function calls made so far.
    pub fn step_count(&self) -> usize {
        self.steps
    }

    pub fn ended(&self) -> &[bool] {
        &self.ended
    }

    /// Accumulated log-probability of the sampled tokens of every row.
    pub fn log_probs(&self) -> &[f32] {
        &self.log_probs
    }

    /// Current cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Current token buffer without the start column, `[rows, length]`.
    pub fn sequences(&self) -> Tensor {
        let len = self.width - 1;
        let mut out = Vec::with_capacity(self.rows * len);
        for row in self.sequences.chunks(self.width) {
            out.extend_from_slice(&row[1..]);
        }
        Tensor::from_u32(out, Shape::new(vec![self.rows, len]))
    }

    /// Advances every row by one token. Does nothing once finished.
    pub fn step<S: StepFn + ?Sized>(
        &mut self,
        step_fn: &mut S,
        sampler: &mut dyn TokenSampler,
        backend: &dyn ComputeBackend,
    ) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        let positions: Vec<usize> = self
            .cursors
            .iter()
            .map(|&c| c.min(self.width - 1))
            .collect();
        let tokens: Vec<u32> = positions
            .iter()
            .enumerate()
            .map(|(r, &c)| self.sequences[r * self.width + c])
            .collect();
        let buffer = Tensor::from_u32(
            self.sequences.clone(),
            Shape::new(vec![self.rows, self.width]),
        );
        let input = StepInput {
            tokens: &tokens,
            positions: &positions,
            sequences: &buffer,
        };
        let (mut logits, cache) = call_step(step_fn, input, mem::take(&mut self.cache))?;
        self.cache = cache;

        self.filters.apply(&mut logits)?;
        let (step_key, next_key) = self.key.split();
        self.key = next_key;
        let sampled = sampler.sample(step_key, &logits)?;
        if sampled.len() != self.rows {
            return Err(DecodeError::shape(
                "sampled tokens",
                &[self.rows],
                &[sampled.len()],
            ));
        }

        let vocab = logits.shape().dim(1);
        let log_softmax = backend.log_softmax(logits.data_f32()?, vocab)?;

        for r in 0..self.rows {
            if self.ended[r] {
                continue;
            }
            let col = self.cursors[r] + 1;
            let slot = r * self.width + col;
            let forced = self.sequences[slot];
            if forced == PAD_ID {
                let token = sampled[r];
                if token as usize >= vocab {
                    return Err(DecodeError::StepFunction(format!(
                        "sampled token {} outside vocabulary of {}",
                        token, vocab
                    )));
                }
                let lp = log_softmax[r * vocab + token as usize];
                self.sequences[slot] = token;
                self.log_probs[r] += lp;
                if token == self.eos_id {
                    self.ended[r] = true;
                }
            }
            self.cursors[r] = col;
            if col >= self.limits[r] {
                self.ended[r] = true;
            }
        }
        self.steps += 1;
        trace!(
            step = self.steps,
            live = self.ended.iter().filter(|&&e| !e).count(),
            "sampling step"
        );
        Ok(())
    }

    /// Steps until every row has ended.
    pub fn run<S: StepFn + ?Sized>(
        mut self,
        step_fn: &mut S,
        sampler: &mut dyn TokenSampler,
        backend: &dyn ComputeBackend,
    ) -> Result<(Tensor, Vec<f32>)> {
        debug!(
            rows = self.rows,
            length = self.width - 1,
            sampler = sampler.name(),
            filters = ?self.filters.names(),
            "sampling decode start"
        );
        while !self.is_finished() {
            self.step(step_fn, sampler, backend)?;
        }
        debug!(steps = self.steps, "sampling decode done");
        Ok(self.finish())
    }

    /// Final `[rows, length]` tokens and per-row log-probabilities.
    pub fn finish(self) -> (Tensor, Vec<f32>) {
        (self.sequences(), self.log_probs)
    }
}

/// `(rows, length)` of a rank-2 u32 token tensor.
pub(crate) fn token_dims(inputs: &Tensor) -> Result<(usize, usize)> {
    if inputs.dtype() != DType::U32 {
        return Err(DecodeError::TensorError(sd_tensor::TensorError::DTypeMismatch {
            expected: DType::U32.to_string(),
            got: inputs.dtype().to_string(),
        }));
    }
    match inputs.shape().dims() {
        &[rows, len] => Ok((rows, len)),
        other => Err(DecodeError::shape("token inputs [rows, length]", &[2], &[other.len()])),
    }
}
