//! Error taxonomy for the sync core.
//!
//! Nothing here crosses a component boundary as an unhandled fault: transport
//! errors surface only through the connection-status stream, decode errors are
//! dropped at the registry, and command failures resolve to `None`.

use thiserror::Error;
use validator::ValidationErrors;

/// Errors raised inside the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket handshake with the server failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    /// A frame was sent while no session is established.
    #[error("connection is not established")]
    NotConnected,
    /// The writer side of the connection has gone away.
    #[error("connection closed")]
    Closed,
    /// An outbound frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Errors surfaced to callers of the sync façade.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Invalid input rejected before any network call.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The caller is not allowed to perform this action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// No local player identity is known for the given game.
    #[error("no local player identity for game `{0}`")]
    MissingIdentity(String),
}

impl From<ValidationErrors> for SyncError {
    fn from(err: ValidationErrors) -> Self {
        SyncError::InvalidInput(format!("validation failed: {err}"))
    }
}
