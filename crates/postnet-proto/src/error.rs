use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("codec error: {0}")]
    Codec(#[from] postnet_codec::CodecError),

    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    #[error("frame exceeds maximum size ({0} bytes)")]
    FrameTooLarge(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
