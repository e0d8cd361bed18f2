use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("cache structure error: {0}")]
    CacheStructure(String),
    #[error("step function failed: {0}")]
    StepFunction(String),
    #[error("tensor error: {0}")]
    TensorError(#[from] sd_tensor::TensorError),
}

impl DecodeError {
    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        DecodeError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
