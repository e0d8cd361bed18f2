use sd_tensor::Tensor;

use crate::error::{DecodeError, Result};

/// Result of a decode: `num_decodes` sequences per input row with their
/// scores, ordered worst first within each row.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutput {
    /// `[batch, num_decodes, length]` u32 token ids.
    pub sequences: Tensor,
    /// `[batch, num_decodes]` f32 scores, ascending within each row.
    pub scores: Tensor,
}

impl DecodeOutput {
    pub(crate) fn new(sequences: Tensor, scores: Tensor) -> Self {
        Self { sequences, scores }
    }

    pub fn batch_size(&self) -> usize {
        self.scores.shape().dim(0)
    }

    pub fn num_decodes(&self) -> usize {
        self.scores.shape().dim(1)
    }

    pub fn seq_len(&self) -> usize {
        self.sequences.shape().dim(2)
    }

    /// Sequence `j` of batch row `b`.
    pub fn sequence(&self, b: usize, j: usize) -> Result<&[u32]> {
        self.check(b, j)?;
        let len = self.seq_len();
        let start = (b * self.num_decodes() + j) * len;
        Ok(&self.sequences.data_u32()?[start..start + len])
    }

    /// Score of sequence `j` of batch row `b`.
    pub fn score(&self, b: usize, j: usize) -> Result<f32> {
        self.check(b, j)?;
        Ok(self.scores.data_f32()?[b * self.num_decodes() + j])
    }

    /// The highest-scoring sequence of batch row `b` and its score.
    pub fn best(&self, b: usize) -> Result<(&[u32], f32)> {
        let j = self.num_decodes().saturating_sub(1);
        Ok((self.sequence(b, j)?, self.score(b, j)?))
    }

    fn check(&self, b: usize, j: usize) -> Result<()> {
        if b >= self.batch_size() || j >= self.num_decodes() {
            return Err(DecodeError::shape(
                "decode output index",
                &[self.batch_size(), self.num_decodes()],
                &[b, j],
            ));
        }
        Ok(())
    }
}
