use std::fmt;

/// Supported element types for tensor storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point (logits, scores, most cache buffers).
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    /// Attention caches are commonly held in this format.
    F16,
    /// Unsigned 32-bit integers (token ids, cache write positions).
    U32,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::U32 => write!(f, "u32"),
        }
    }
}
