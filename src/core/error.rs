use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::core::reducer::Ignored;

/// Failure taxonomy of the table client. None of these end a session on their own.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect refused, socket dropped. Recovered by the reconnect policy.
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// The link is not open, so nothing can be sent.
    #[error("no live connection")]
    Disconnected,

    /// Unparseable or unknown payload. Logged and dropped.
    #[error("malformed payload: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The server answered with `type: error`.
    #[error("server reported: {0}")]
    Server(String),

    /// An event that does not fit the local session (unknown player, wrong phase).
    #[error("inconsistent event: {0}")]
    Inconsistent(#[from] Ignored),

    #[error("invalid room code {0:?}")]
    InvalidRoom(String),

    #[error("invalid origin: {0}")]
    InvalidOrigin(String),
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidOrigin(err.to_string())
    }
}
