use thiserror::Error;

/// Failure modes of [`crate::encode`] and [`crate::decode`] (spec §4.1, §7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of bitstream")]
    UnexpectedEnd,

    #[error("value out of range for width {width} bits")]
    OutOfRange { width: u32 },

    #[error("schema/value shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("vector length mismatch: schema expects {expected}, value has {actual}")]
    VectorLengthMismatch { expected: usize, actual: usize },

    #[error("union has no variants")]
    EmptyUnion,

    #[error("unknown union variant: {0}")]
    UnknownVariant(String),

    #[error("decoded string is not valid UTF-8")]
    InvalidUtf8,
}
