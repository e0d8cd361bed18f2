//! `sd-sampler` - Logit filtering and token sampling for sequence decoding.
//!
//! Filters rewrite a row of logits in place (temperature scaling, top-k and
//! top-p truncation); masked entries are set to [`NEG_INF`], a large but
//! finite negative value, so softmax stays well defined. A
//! [`TokenSampler`] then draws one token per row from the filtered logits
//! using an explicit [`RngKey`].

pub mod categorical;
pub mod rng;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use categorical::{CategoricalSampler, TokenSampler};
pub use rng::RngKey;
pub use sampler::{FilterChain, LogitsFilter};
pub use temperature::TemperatureFilter;
pub use top_k::{top_k_two_stage, TopKFilter, TWO_STAGE_CHUNKS, TWO_STAGE_MIN_VOCAB};
pub use top_p::TopPFilter;

/// Logit value used for masked-out tokens.
pub const NEG_INF: f32 = -1.0e7;
