use thiserror::Error;

/// Why a remote call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("server rejected the call ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("connection closed before a response arrived")]
    Disconnected,

    #[error("failed to encode call arguments: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0} is a procedure, not a subscribable cell")]
    NotSubscribable(String),

    #[error(transparent)]
    Call(#[from] CallError),
}
