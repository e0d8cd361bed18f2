//! Beam search as an explicit state machine.
//!
//! Every batch row keeps `k = num_decodes` live beams and up to `k`
//! finished beams, each stored worst first. Live beam scores are raw
//! cumulative log-probabilities; finished scores are length-normalized.
//! The model sees the live beams as `batch * k` flat rows, and the cache
//! rows follow the beams they belong to.

use std::cmp::Ordering;
use std::mem;

use sd_tensor::cpu::top_k_indices;
use sd_tensor::{ComputeBackend, CpuBackend, Shape, Tensor};
use tracing::{debug, trace};

use crate::beam::{flat_batch_beam_expand, gather_beams};
use crate::cache::{cache_map, Cache};
use crate::config::BeamSearchConfig;
use crate::error::{DecodeError, Result};
use crate::output::DecodeOutput;
use crate::sampling::token_dims;
use crate::step::{call_step, StepFn, StepInput};
use crate::{FORCED_SCORE_FLOOR, NEG_INF, PAD_ID};

/// Beam search decoding.
///
/// `inputs` is `[batch, length]` u32 with the start slot in column 0 and
/// forced prompt tokens from column 1. Returns `config.num_decodes`
/// sequences of length `config.max_decode_len` (default: `length`) per
/// row, sorted by score, worst first.
///
/// Cache data leaves are expanded to `batch * num_decodes` rows and follow
/// their beams on every reorder. Index leaves are left as they are, so the
/// step function sees one shared write position for all beams.
pub fn beam_search<S: StepFn + ?Sized>(
    inputs: &Tensor,
    cache: Cache,
    step_fn: &mut S,
    eos_id: u32,
    config: &BeamSearchConfig,
) -> Result<DecodeOutput> {
    beam_search_with(inputs, cache, step_fn, eos_id, config, &CpuBackend::new())
}

/// [`beam_search`] on an explicit compute backend.
pub fn beam_search_with<S: StepFn + ?Sized>(
    inputs: &Tensor,
    cache: Cache,
    step_fn: &mut S,
    eos_id: u32,
    config: &BeamSearchConfig,
    backend: &dyn ComputeBackend,
) -> Result<DecodeOutput> {
    BeamSearch::new(inputs, cache, eos_id, config)?.run(step_fn, backend)
}

/// A live or finished hypothesis being moved between beam slots.
struct Hypothesis {
    score: f32,
    tokens: Vec<u32>,
}

/// Beam search state for a whole batch.
pub struct BeamSearch {
    batch: usize,
    beams: usize,
    max_len: usize,
    /// Columns per token row: `max_len + 1`.
    width: usize,
    /// Forced prompt tokens, `batch * width`.
    forced: Vec<u32>,
    live_seqs: Vec<u32>,
    live_scores: Vec<f32>,
    fin_seqs: Vec<u32>,
    fin_scores: Vec<f32>,
    fin_flags: Vec<bool>,
    /// Rows that stopped expanding.
    done: Vec<bool>,
    cursor: usize,
    cache: Cache,
    config: BeamSearchConfig,
    eos_id: u32,
}

impl BeamSearch {
    pub fn new(
        inputs: &Tensor,
        cache: Cache,
        eos_id: u32,
        config: &BeamSearchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (batch, len) = token_dims(inputs)?;
        let data = inputs.data_u32()?;
        let beams = config.num_decodes;
        let max_len = config.max_decode_len.unwrap_or(len);
        let width = max_len + 1;
        if max_len == 0 {
            return Err(DecodeError::InvalidConfig(
                "beam search needs at least one output position".to_string(),
            ));
        }

        let mut forced = vec![PAD_ID; batch * width];
        for b in 0..batch {
            let n = len.min(width);
            forced[b * width..b * width + n].copy_from_slice(&data[b * len..b * len + n]);
        }
        let mut live_seqs = Vec::with_capacity(batch * beams * width);
        for b in 0..batch {
            for _ in 0..beams {
                live_seqs.push(forced[b * width]);
                live_seqs.extend(std::iter::repeat(PAD_ID).take(max_len));
            }
        }
        // One live beam per row starts at 0 so the others do not duplicate it.
        let mut live_scores = vec![NEG_INF; batch * beams];
        for b in 0..batch {
            live_scores[b * beams + beams - 1] = 0.0;
        }

        cache.check_rows(batch, false)?;
        let cache = cache_map(|t| flat_batch_beam_expand(t, beams), &cache, false)?;

        Ok(Self {
            batch,
            beams,
            max_len,
            width,
            forced,
            live_seqs,
            live_scores,
            fin_seqs: vec![PAD_ID; batch * beams * width],
            fin_scores: vec![NEG_INF; batch * beams],
            fin_flags: vec![false; batch * beams],
            done: vec![false; batch],
            cursor: 0,
            cache,
            config: config.clone(),
            eos_id,
        })
    }

    /// True once every row stopped expanding or the length budget is spent.
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.max_len || self.done.iter().all(|&d| d)
    }

    /// Number of positions decoded so far.
    pub fn step_count(&self) -> usize {
        self.cursor
    }

    /// Rows that stopped expanding.
    pub fn done(&self) -> &[bool] {
        &self.done
    }

    /// Raw live scores, `beams` per row, worst first.
    pub fn live_scores(&self) -> &[f32] {
        &self.live_scores
    }

    /// Normalized finished scores, `beams` per row, worst first; unfilled
    /// slots hold the sentinel.
    pub fn finished_scores(&self) -> &[f32] {
        &self.fin_scores
    }

    fn penalty(&self, length: usize) -> f32 {
        self.config.penalty(length)
    }

    /// Marks rows whose best live beam can no longer beat their worst
    /// finished beam.
    fn update_done(&mut self) {
        let k = self.beams;
        let bound_penalty = self.penalty(self.max_len);
        for b in 0..self.batch {
            if self.done[b] || !self.fin_flags[b * k..(b + 1) * k].iter().all(|&f| f) {
                continue;
            }
            let best_live = self.live_scores[b * k + k - 1] / bound_penalty;
            let worst_finished = self.fin_scores[b * k];
            if best_live <= worst_finished {
                self.done[b] = true;
            }
        }
    }

    /// Decodes one position for every row that is still expanding.
    pub fn step<S: StepFn + ?Sized>(
        &mut self,
        step_fn: &mut S,
        backend: &dyn ComputeBackend,
    ) -> Result<()> {
        self.update_done();
        if self.is_finished() {
            return Ok(());
        }
        let k = self.beams;
        let rows = self.batch * k;
        let c = self.cursor;

        let tokens: Vec<u32> = (0..rows).map(|i| self.live_seqs[i * self.width + c]).collect();
        let positions = vec![c; rows];
        let buffer = Tensor::from_u32(self.live_seqs.clone(), Shape::new(vec![rows, self.width]));
        let input = StepInput {
            tokens: &tokens,
            positions: &positions,
            sequences: &buffer,
        };
        let (logits, cache) = call_step(step_fn, input, mem::take(&mut self.cache))?;
        let vocab = logits.shape().dim(1);
        let log_probs = backend.log_softmax(logits.data_f32()?, vocab)?;

        // Old beam feeding every new beam slot; identity unless expanded.
        let mut gather: Vec<usize> = (0..rows).map(|i| i % k).collect();
        for b in 0..self.batch {
            if self.done[b] {
                continue;
            }
            let forced = self.forced[b * self.width + c + 1];
            let sources = if forced != PAD_ID {
                self.force_row(b, forced, &log_probs, vocab)?
            } else {
                self.expand_row(b, &log_probs, vocab)
            };
            for (j, src) in sources.into_iter().enumerate() {
                gather[b * k + j] = src;
            }
        }

        self.cache = cache_map(|t| gather_beams(t, &gather, self.batch, k, k), &cache, false)?;
        self.cursor += 1;
        trace!(
            position = self.cursor,
            done = self.done.iter().filter(|&&d| d).count(),
            "beam search step"
        );
        Ok(())
    }

    /// Appends a forced token to every beam of row `b`. Beams forced onto
    /// EOS move to the finished set and leave a dead live slot behind.
    /// Returns, for every live slot, the old beam it now holds.
    fn force_row(
        &mut self,
        b: usize,
        token: u32,
        log_probs: &[f32],
        vocab: usize,
    ) -> Result<Vec<usize>> {
        if token as usize >= vocab {
            return Err(DecodeError::StepFunction(format!(
                "forced token {} outside vocabulary of {}",
                token, vocab
            )));
        }
        let k = self.beams;
        let w = self.width;
        let col = self.cursor + 1;
        let finish_penalty = self.penalty(col);

        let mut live: Vec<(Hypothesis, usize)> = Vec::with_capacity(k);
        let mut finished: Vec<Hypothesis> = Vec::new();
        for beam in 0..k {
            let i = b * k + beam;
            let base = self.live_scores[i];
            let mut score = if base > NEG_INF {
                (base + log_probs[i * vocab + token as usize]).max(FORCED_SCORE_FLOOR)
            } else {
                NEG_INF
            };
            let mut tokens = self.live_seqs[i * w..(i + 1) * w].to_vec();
            tokens[col] = token;
            if token == self.eos_id && score > NEG_INF {
                finished.push(Hypothesis {
                    score: score / finish_penalty,
                    tokens: tokens.clone(),
                });
                score = NEG_INF;
            }
            live.push((Hypothesis { score, tokens }, beam));
        }

        // Per-beam log-probabilities can reorder the row; stable, so ties
        // keep their slots.
        live.sort_by(|x, y| x.0.score.partial_cmp(&y.0.score).unwrap_or(Ordering::Equal));
        let sources = self.store_live(b, live);

        if !finished.is_empty() {
            finished.reverse();
            let mut pool = self.finished_best_first(b);
            pool.extend(finished);
            self.store_finished(b, pool);
        }
        Ok(sources)
    }

    /// Writes row `b`'s live beams, given worst first with the old beam each
    /// one continues. Returns those old beams in slot order.
    fn store_live(&mut self, b: usize, live: Vec<(Hypothesis, usize)>) -> Vec<usize> {
        let w = self.width;
        let mut sources = Vec::with_capacity(self.beams);
        for (j, (hyp, beam)) in live.into_iter().enumerate() {
            let i = b * self.beams + j;
            self.live_scores[i] = hyp.score;
            self.live_seqs[i * w..(i + 1) * w].copy_from_slice(&hyp.tokens);
            sources.push(beam);
        }
        sources
    }

    /// Expands row `b` by one free token. Returns, for every new live beam
    /// slot, the old beam it continues.
    fn expand_row(&mut self, b: usize, log_probs: &[f32], vocab: usize) -> Vec<usize> {
        let k = self.beams;
        let w = self.width;
        let col = self.cursor + 1;

        // Candidate `beam * vocab + token` extends `beam` with `token`.
        let mut candidates = Vec::with_capacity(k * vocab);
        for beam in 0..k {
            let i = b * k + beam;
            let base = self.live_scores[i];
            candidates.extend(log_probs[i * vocab..(i + 1) * vocab].iter().map(|&lp| base + lp));
        }
        let top = top_k_indices(&candidates, 2 * k);

        let mut live: Vec<(Hypothesis, usize)> = Vec::with_capacity(k);
        let mut finished: Vec<Hypothesis> = Vec::new();
        let finish_penalty = self.penalty(col);
        for flat in top {
            let (beam, token) = (flat / vocab, (flat % vocab) as u32);
            let score = candidates[flat];
            let src = (b * k + beam) * w;
            if token == self.eos_id {
                if score > NEG_INF {
                    let mut tokens = self.live_seqs[src..src + w].to_vec();
                    tokens[col] = token;
                    finished.push(Hypothesis {
                        score: score / finish_penalty,
                        tokens,
                    });
                }
            } else if live.len() < k {
                let mut tokens = self.live_seqs[src..src + w].to_vec();
                tokens[col] = token;
                live.push((Hypothesis { score, tokens }, beam));
            }
        }
        // Tiny vocabularies can leave fewer than k continuations.
        while live.len() < k {
            let src = b * k * w;
            let mut tokens = self.live_seqs[src..src + w].to_vec();
            tokens[col] = PAD_ID;
            live.push((
                Hypothesis {
                    score: NEG_INF,
                    tokens,
                },
                0,
            ));
        }

        // Store worst first.
        live.reverse();
        let sources = self.store_live(b, live);

        if !finished.is_empty() {
            let mut pool = self.finished_best_first(b);
            pool.extend(finished);
            self.store_finished(b, pool);
        }
        sources
    }

    /// Finished beams of row `b`, best first.
    fn finished_best_first(&self, b: usize) -> Vec<Hypothesis> {
        let w = self.width;
        (b * self.beams..(b + 1) * self.beams)
            .rev()
            .filter(|&i| self.fin_flags[i])
            .map(|i| Hypothesis {
                score: self.fin_scores[i],
                tokens: self.fin_seqs[i * w..(i + 1) * w].to_vec(),
            })
            .collect()
    }

    /// Keeps the best `beams` entries of `pool` as row `b`'s finished set.
    /// Earlier pool entries win ties.
    fn store_finished(&mut self, b: usize, mut pool: Vec<Hypothesis>) {
        let k = self.beams;
        let w = self.width;
        pool.sort_by(|x, y| descending(x.score, y.score));
        pool.truncate(k);
        let empty = k - pool.len();
        for j in 0..k {
            let i = b * k + j;
            if j < empty {
                self.fin_flags[i] = false;
                self.fin_scores[i] = NEG_INF;
                self.fin_seqs[i * w..(i + 1) * w].fill(PAD_ID);
            } else {
                let hyp = &pool[k - 1 - j];
                self.fin_flags[i] = true;
                self.fin_scores[i] = hyp.score;
                self.fin_seqs[i * w..(i + 1) * w].copy_from_slice(&hyp.tokens);
            }
        }
    }

    /// Runs to completion and returns the decoded beams.
    pub fn run<S: StepFn + ?Sized>(
        mut self,
        step_fn: &mut S,
        backend: &dyn ComputeBackend,
    ) -> Result<DecodeOutput> {
        debug!(
            batch = self.batch,
            beams = self.beams,
            max_len = self.max_len,
            alpha = self.config.alpha,
            "beam search start"
        );
        while !self.is_finished() {
            self.step(step_fn, backend)?;
        }
        debug!(steps = self.cursor, "beam search done");
        Ok(self.finish())
    }

    /// Final sequences and scores.
    ///
    /// Rows with fewer than `beams` finished hypotheses are topped up with
    /// their best live beams, normalized by the number of decoded
    /// positions.
    pub fn finish(self) -> DecodeOutput {
        let k = self.beams;
        let w = self.width;
        let live_penalty = self.penalty(self.cursor.max(1));

        let mut sequences = Vec::with_capacity(self.batch * k * self.max_len);
        let mut scores = Vec::with_capacity(self.batch * k);
        for b in 0..self.batch {
            let mut pool = self.finished_best_first(b);
            let missing = k - pool.len();
            pool.extend(
                (b * k..(b + 1) * k)
                    .rev()
                    .take(missing)
                    .map(|i| Hypothesis {
                        score: self.live_scores[i] / live_penalty,
                        tokens: self.live_seqs[i * w..(i + 1) * w].to_vec(),
                    }),
            );
            pool.sort_by(|x, y| descending(x.score, y.score));
            for hyp in pool.iter().rev() {
                sequences.extend_from_slice(&hyp.tokens[1..]);
                scores.push(hyp.score);
            }
        }

        DecodeOutput::new(
            Tensor::from_u32(sequences, Shape::new(vec![self.batch, k, self.max_len])),
            Tensor::new(scores, Shape::new(vec![self.batch, k])),
        )
    }
}

fn descending(x: f32, y: f32) -> Ordering {
    y.partial_cmp(&x).unwrap_or(Ordering::Equal)
}
