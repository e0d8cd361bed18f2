use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// Parameters of [`sample_decode`](crate::sample_decode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Independent trials decoded per input row.
    pub num_decodes: usize,
    /// Softmax temperature; must be positive.
    pub temperature: f32,
    /// Top-k filtering (0 = disabled, 1 = greedy).
    pub topk: usize,
    /// Nucleus sampling threshold in `[0, 1]` (0 = disabled).
    pub topp: f32,
    /// Maximum number of tokens generated after the prompt of each row.
    pub max_decode_steps: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_decodes: 1,
            temperature: 1.0,
            topk: 1,
            topp: 0.0,
            max_decode_steps: None,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_decodes < 1 {
            return Err(DecodeError::InvalidConfig(
                "num_decodes must be at least 1".to_string(),
            ));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(DecodeError::InvalidConfig(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.topp) {
            return Err(DecodeError::InvalidConfig(format!(
                "topp must be within [0, 1], got {}",
                self.topp
            )));
        }
        Ok(())
    }
}

/// Length normalization applied to beam scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthPenalty {
    /// `length ^ alpha`.
    #[default]
    Power,
    /// `((5 + length) / 6) ^ alpha`.
    Gnmt,
}

impl LengthPenalty {
    /// Divisor for the raw log-probability of a beam of `length` tokens.
    pub fn divisor(self, alpha: f32, length: usize) -> f32 {
        let length = length as f32;
        match self {
            LengthPenalty::Power => length.powf(alpha),
            LengthPenalty::Gnmt => ((5.0 + length) / 6.0).powf(alpha),
        }
    }
}

/// Parameters of [`beam_search`](crate::beam_search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamSearchConfig {
    /// Beam width, also the number of sequences returned per input row.
    pub num_decodes: usize,
    /// Length normalization exponent (0 = disabled).
    pub alpha: f32,
    /// Output length; defaults to the input length.
    pub max_decode_len: Option<usize>,
    pub length_penalty: LengthPenalty,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            num_decodes: 1,
            alpha: 0.0,
            max_decode_len: None,
            length_penalty: LengthPenalty::Power,
        }
    }
}

impl BeamSearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_decodes < 1 {
            return Err(DecodeError::InvalidConfig(
                "num_decodes must be at least 1".to_string(),
            ));
        }
        if !self.alpha.is_finite() {
            return Err(DecodeError::InvalidConfig(format!(
                "alpha must be finite, got {}",
                self.alpha
            )));
        }
        if self.max_decode_len == Some(0) {
            return Err(DecodeError::InvalidConfig(
                "max_decode_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Length normalization divisor for a beam of `length` tokens.
    pub fn penalty(&self, length: usize) -> f32 {
        self.length_penalty.divisor(self.alpha, length)
    }
}
