//! `sd-decoding` - Autoregressive decoding loops over an opaque step function.
//!
//! This crate provides:
//! - [`sample_decode`]: temperature sampling with top-k / top-p filtering,
//!   several independent trials per row, forced prompt prefixes and
//!   per-row start positions
//! - [`beam_search`]: length-normalized beam search with forced prefixes
//! - [`Cache`] and [`cache_map`] for the nested decoder state the model
//!   carries between calls
//! - Batch / beam layout helpers in [`beam`]
//!
//! The model is anything implementing [`StepFn`]. Token buffers carry a
//! start slot in column 0; [`PAD_ID`] marks free positions.

pub mod beam;
pub mod beam_search;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod output;
pub mod sampling;
pub mod step;

pub use beam::{
    add_beam_dim, flat_batch_beam_expand, flatten_beam_dim, gather_beams, unflatten_beam_dim,
};
pub use beam_search::{beam_search, beam_search_with, BeamSearch};
pub use cache::{cache_map, Cache, CacheLeaf, CacheNode, LeafKind, INDEX_SUFFIX};
pub use config::{BeamSearchConfig, LengthPenalty, SamplingConfig};
pub use driver::{sample_decode, sample_decode_with};
pub use error::{DecodeError, Result};
pub use output::DecodeOutput;
pub use sampling::SamplingLoop;
pub use step::{fn_step, FnStep, StepFn, StepInput};

pub use sd_sampler::NEG_INF;

/// Token id of an empty position.
pub const PAD_ID: u32 = 0;

/// Lowest score a beam can reach by following forced prompt tokens, so an
/// unlikely prompt never turns a live beam into a dead one.
pub const FORCED_SCORE_FLOOR: f32 = -1.0e6;
