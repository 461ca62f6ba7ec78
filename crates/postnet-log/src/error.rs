use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index file for room {room} ({len} bytes is not a multiple of 8)")]
    CorruptIndex { room: String, len: u64 },
}
