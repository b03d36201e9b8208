use thiserror::Error;

pub use crate::sync::stomp::FrameError;

/// Failures of a REST call against the clipboard backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures of the event-bus connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid WS URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("WebSocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("STOMP handshake failed: {0}")]
    Handshake(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Export request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Cannot write export file: {0}")]
    Io(#[from] std::io::Error),
}
