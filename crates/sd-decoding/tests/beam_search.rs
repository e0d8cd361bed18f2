//! End-to-end tests for `beam_search` on toy models with known optima.

use approx::assert_abs_diff_eq;
use sd_decoding::{
    beam_search, cache_map, fn_step, BeamSearchConfig, Cache, DecodeError, DecodeOutput,
    LengthPenalty, Result, StepInput, NEG_INF,
};
use sd_tensor::{Shape, Tensor};

const EOS_ID: u32 = 1;

fn tokens(rows: &[&[u32]]) -> Tensor {
    let len = rows[0].len();
    let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::from_u32(data, Shape::new(vec![rows.len(), len]))
}

/// Every beam of batch row `b` gets `per_batch[b]`.
fn per_batch_logits(
    per_batch: Vec<Vec<f32>>,
    beams: usize,
) -> impl FnMut(StepInput<'_>, Cache) -> Result<(Tensor, Cache)> {
    move |input, cache| {
        let vocab = per_batch[0].len();
        let mut data = Vec::with_capacity(input.rows() * vocab);
        for r in 0..input.rows() {
            data.extend_from_slice(&per_batch[r / beams]);
        }
        Ok((Tensor::new(data, Shape::new(vec![input.rows(), vocab])), cache))
    }
}

fn log_softmax(row: &[f32]) -> Vec<f64> {
    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
    let lse = row.iter().map(|&v| (v as f64 - max).exp()).sum::<f64>().ln() + max;
    row.iter().map(|&v| v as f64 - lse).collect()
}

fn assert_scores_ascending(out: &DecodeOutput) {
    for b in 0..out.batch_size() {
        let scores: Vec<f32> = (0..out.num_decodes()).map(|j| out.score(b, j).unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]), "row {}: {:?}", b, scores);
    }
}

const STATES: [&str; 5] = ["PAD", "A", "B", "START-", "-END"];
const START: usize = 3;
const END: usize = 4;

/// Transition log-potentials `[time][from][to]` of a five-state chain whose
/// two best paths are START-AABBA-END and START-BBAAB-END.
fn markov_potentials() -> Vec<[[f32; 5]; 5]> {
    let ab = [
        [[1.0, -1.0], [-1.0, 1.0]],
        [[-1.0, 1.0], [1.0, -1.0]],
        [[1.0, -1.0], [-1.0, 1.0]],
        [[-1.0, 1.0], [1.0, -1.0]],
    ];
    let mut edges = vec![[[NEG_INF; 5]; 5]; 6];
    for (t, block) in ab.iter().enumerate() {
        for i in 0..2 {
            for j in 0..2 {
                edges[t + 1][i + 1][j + 1] = block[i][j];
            }
        }
    }
    edges[0][START][1] = 0.0;
    edges[0][START][2] = 0.0;
    edges[5][1][END] = 0.0;
    edges[5][2][END] = 0.0;
    for step in edges.iter_mut() {
        step[0] = [0.0; 5];
    }
    edges
}

#[test]
fn test_markov_chain_optimal_paths() {
    let batch = 2;
    let beams = 2;
    let decode_length = 7;
    let edges = markov_potentials();
    let mut start_logits = [NEG_INF; 5];
    start_logits[START] = 0.0;

    // The step counter lives in the cache so it follows beam reordering.
    let mut cache = Cache::new();
    cache.insert_data("cur_iter", Tensor::zeros(Shape::new(vec![batch, 1])));
    let mut step = fn_step(|input: StepInput<'_>, cache: Cache| {
        let iters = cache
            .get_path(&["cur_iter"])
            .map(|leaf| leaf.value.to_f32_vec())
            .unwrap_or_default();
        let mut data = Vec::with_capacity(input.rows() * 5);
        for (r, &token) in input.tokens.iter().enumerate() {
            let t = iters[r] as usize;
            if t == 0 {
                data.extend_from_slice(&start_logits);
            } else {
                data.extend_from_slice(&edges[t - 1][token as usize]);
            }
        }
        let cache = cache_map(|x| Ok(x.map_f32(|v| v + 1.0)?), &cache, false)?;
        Ok((Tensor::new(data, Shape::new(vec![input.rows(), 5])), cache))
    });

    let config = BeamSearchConfig {
        num_decodes: beams,
        alpha: 0.0,
        max_decode_len: Some(decode_length),
        ..Default::default()
    };
    let inputs = Tensor::from_u32(vec![0; batch * decode_length], Shape::new(vec![batch, decode_length]));
    let out = beam_search(&inputs, cache, &mut step, END as u32, &config).unwrap();

    assert_eq!(out.sequences.shape().dims(), &[batch, beams, decode_length]);
    for b in 0..batch {
        let mut found: Vec<String> = (0..beams)
            .map(|j| {
                out.sequence(b, j)
                    .unwrap()
                    .iter()
                    .map(|&t| STATES[t as usize])
                    .collect()
            })
            .collect();
        found.sort();
        assert_eq!(found, vec!["START-AABBA-END", "START-BBAAB-END"]);
        // Mirror-image paths collect the same potentials.
        assert_abs_diff_eq!(out.score(b, 0).unwrap(), out.score(b, 1).unwrap(), epsilon = 1e-4);
    }
}

#[test]
fn test_forced_prefix() {
    let beams = 2;
    let logits = vec![
        vec![-1e7, -1e10, -0.1, -0.9, -1e1, -2e1, -3e1, -4e1],
        vec![-1e7, -1e10, -0.9, -0.1, -1e1, -2e1, -3e1, -4e1],
    ];
    let mut step = fn_step(per_batch_logits(logits.clone(), beams));
    let inputs = tokens(&[&[0, 7, 0, 0, 0], &[0, 4, 5, 0, 0]]);
    let config = BeamSearchConfig { num_decodes: beams, ..Default::default() };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();

    assert_eq!(out.sequences.shape().dims(), &[2, 2, 5]);
    assert_scores_ascending(&out);
    assert_eq!(out.best(0).unwrap().0, &[7, 2, 2, 2, 2]);
    assert_eq!(out.best(1).unwrap().0, &[4, 5, 3, 3, 3]);

    // Runner-up of row 0 swaps exactly one free token for the second choice.
    let runner_up = out.sequence(0, 0).unwrap();
    assert_eq!(runner_up[0], 7);
    assert_eq!(runner_up[1..].iter().filter(|&&t| t == 3).count(), 1);
    assert_eq!(runner_up[1..].iter().filter(|&&t| t == 2).count(), 3);
    let runner_up = out.sequence(1, 0).unwrap();
    assert_eq!(&runner_up[..2], &[4, 5]);
    assert_eq!(runner_up[2..].iter().filter(|&&t| t == 2).count(), 1);

    // Scores are plain sums of per-token log-probabilities, prompt included.
    for b in 0..2 {
        let lp = log_softmax(&logits[b]);
        for j in 0..beams {
            let expected: f64 = out.sequence(b, j).unwrap().iter().map(|&t| lp[t as usize]).sum();
            assert_abs_diff_eq!(out.score(b, j).unwrap() as f64, expected, epsilon = 1e-3);
        }
    }
}

#[test]
fn test_unlikely_prompt_keeps_beams_alive() {
    let beams = 2;
    let logits = vec![vec![-1e7, -1e10, -0.9, -0.1, -1e10, -1e10, -1e10]];
    let mut step = fn_step(per_batch_logits(logits.clone(), beams));
    let inputs = tokens(&[&[0, 4, 5, 6, 0]]);
    let config = BeamSearchConfig { num_decodes: beams, ..Default::default() };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();

    assert_scores_ascending(&out);
    assert_eq!(out.best(0).unwrap().0, &[4, 5, 6, 3, 3]);
    let runner_up = out.sequence(0, 0).unwrap();
    assert_eq!(&runner_up[..3], &[4, 5, 6]);
    let mut tail = runner_up[3..].to_vec();
    tail.sort();
    assert_eq!(tail, vec![2, 3]);

    // Unfloored, the forced prompt alone would sink below the sentinel.
    let lp = log_softmax(&logits[0]);
    let raw: f64 = [4usize, 5, 6].iter().map(|&t| lp[t]).sum();
    assert!(raw < -1e7);

    // Floored at every forced token, then free tokens add up normally.
    let floor = -1e6;
    let best = floor + lp[3] + lp[3];
    let second = floor + lp[2] + lp[3];
    assert_abs_diff_eq!(out.score(0, 1).unwrap() as f64, best, epsilon = 0.1);
    assert_abs_diff_eq!(out.score(0, 0).unwrap() as f64, second, epsilon = 0.1);
}

#[test]
fn test_no_prefix() {
    let beams = 2;
    let logits = vec![vec![-1e7, -1e10, -0.1, -0.9], vec![-1e7, -1e10, -0.9, -0.1]];
    let mut step = fn_step(per_batch_logits(logits, beams));
    let inputs = tokens(&[&[0, 0, 0, 0, 0], &[0, 0, 0, 0, 0]]);
    let config = BeamSearchConfig { num_decodes: beams, ..Default::default() };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();

    assert_scores_ascending(&out);
    assert_eq!(out.best(0).unwrap().0, &[2, 2, 2, 2, 2]);
    assert_eq!(out.best(1).unwrap().0, &[3, 3, 3, 3, 3]);
    for (b, other) in [(0usize, 3u32), (1, 2)] {
        let runner_up = out.sequence(b, 0).unwrap();
        assert_eq!(runner_up.iter().filter(|&&t| t == other).count(), 1);
    }
}

#[test]
fn test_eos_finishes_beams_with_length_penalty() {
    let beams = 2;
    // EOS is likely from the start; token 2 is the runner-up.
    let logits = vec![vec![-1e7, -0.2, -1.0, -4.0]];
    let mut step = fn_step(per_batch_logits(logits.clone(), beams));
    let inputs = tokens(&[&[0, 0, 0, 0, 0, 0]]);
    let config = BeamSearchConfig {
        num_decodes: beams,
        alpha: 0.6,
        length_penalty: LengthPenalty::Power,
        ..Default::default()
    };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();

    assert_scores_ascending(&out);
    let lp = log_softmax(&logits[0]);
    let (best, score) = out.best(0).unwrap();
    assert_eq!(best, &[1, 0, 0, 0, 0, 0]);
    assert_abs_diff_eq!(score as f64, lp[1], epsilon = 1e-4);
    let runner_up = out.sequence(0, 0).unwrap();
    assert_eq!(&runner_up[..2], &[2, 1]);
    let expected = (lp[2] + lp[1]) / 2f64.powf(0.6);
    assert_abs_diff_eq!(out.score(0, 0).unwrap() as f64, expected, epsilon = 1e-4);
}

#[test]
fn test_max_decode_len_sets_output_length() {
    let beams = 3;
    let mut step = fn_step(per_batch_logits(vec![vec![-1e7, -5.0, -0.5, -1.0, -2.0]], beams));
    let inputs = tokens(&[&[0, 4, 0]]);
    let config = BeamSearchConfig {
        num_decodes: beams,
        max_decode_len: Some(6),
        ..Default::default()
    };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();
    assert_eq!(out.sequences.shape().dims(), &[1, 3, 6]);
    assert_eq!(out.scores.shape().dims(), &[1, 3]);
    for j in 0..beams {
        assert_eq!(out.sequence(0, j).unwrap()[0], 4);
    }
    assert_eq!(out.best(0).unwrap().0, &[4, 2, 2, 2, 2, 2]);
}

#[test]
fn test_invalid_config_is_rejected() {
    let inputs = tokens(&[&[0, 0, 0]]);
    let mut step = fn_step(per_batch_logits(vec![vec![0.0, 0.0, 0.0]], 1));
    let config = BeamSearchConfig { num_decodes: 0, ..Default::default() };
    let err = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config);
    assert!(matches!(err, Err(DecodeError::InvalidConfig(_))));
}

#[test]
fn test_forced_token_after_free_slot_keeps_best_live_beam() {
    let beams = 2;
    // The forced 3 is cheap after a 3 and expensive after a 2.
    let mut step = fn_step(|input: StepInput<'_>, cache: Cache| {
        let mut data = Vec::with_capacity(input.rows() * 4);
        for &token in input.tokens {
            data.extend_from_slice(&match token {
                0 => [-1e9, 0.0, 0.0, -1.0],
                2 => [-1e9, -1e9, 0.0, -10.0],
                _ => [-1e9, -1e9, 0.0, 0.0],
            });
        }
        Ok((Tensor::new(data, Shape::new(vec![input.rows(), 4])), cache))
    });
    let inputs = tokens(&[&[0, 0, 3]]);
    let config = BeamSearchConfig {
        num_decodes: beams,
        max_decode_len: Some(2),
        ..Default::default()
    };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();

    assert_scores_ascending(&out);
    let lp0 = log_softmax(&[-1e9, 0.0, 0.0, -1.0]);
    let lp3 = log_softmax(&[-1e9, -1e9, 0.0, 0.0]);
    let (best, score) = out.best(0).unwrap();
    assert_eq!(best, &[1, 0]);
    assert_abs_diff_eq!(score as f64, lp0[1], epsilon = 1e-4);
    assert_eq!(out.sequence(0, 0).unwrap(), &[3, 3]);
    assert_abs_diff_eq!(out.score(0, 0).unwrap() as f64, lp0[3] + lp3[3], epsilon = 1e-4);
}

#[test]
fn test_prompt_ending_in_eos_is_finished() {
    let beams = 2;
    let logits = vec![vec![-1e7, -1.0, -0.1, -0.9, -2.0, -3.0]];
    let mut step = fn_step(per_batch_logits(logits.clone(), beams));
    let inputs = tokens(&[&[0, 5, 1, 0, 0]]);
    let config = BeamSearchConfig { num_decodes: beams, ..Default::default() };
    let out = beam_search(&inputs, Cache::new(), &mut step, EOS_ID, &config).unwrap();

    assert_scores_ascending(&out);
    let lp = log_softmax(&logits[0]);
    let (best, score) = out.best(0).unwrap();
    assert_eq!(best, &[5, 1, 0, 0, 0]);
    assert_abs_diff_eq!(score as f64, lp[5] + lp[1], epsilon = 1e-4);
    // Nothing else finished, so the other slot holds a dead live beam.
    assert!(out.score(0, 0).unwrap() < -1e6);
}
