use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine was closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] postnet_transport::TransportError),
}
