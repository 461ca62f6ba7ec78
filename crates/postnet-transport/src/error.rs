use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport was closed")]
    Closed,

    #[error("room {room:?} already watched with a different schema")]
    SchemaMismatch { room: String },

    #[error("operation requires a completed time sync")]
    NotSynced,

    #[error(transparent)]
    Proto(#[from] postnet_proto::ProtoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
