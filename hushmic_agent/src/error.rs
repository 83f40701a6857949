use hushmic_protocol::ipc::FrameError;
use hushmic_protocol::{ApplicationKind, FailureKind};
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0} is not running")]
    NotRunning(ApplicationKind),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("no matching debug target")]
    TargetNotFound,
    #[error("action failed: {0}")]
    ActionFailed(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl ControlError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ControlError::NotRunning(_) => FailureKind::NotRunning,
            ControlError::ConnectionFailed(_) => FailureKind::ConnectionFailed,
            ControlError::Protocol(_) | ControlError::Json(_) => FailureKind::ProtocolError,
            ControlError::AuthorizationDenied(_) => FailureKind::AuthorizationDenied,
            ControlError::AuthenticationFailed(_) => FailureKind::AuthenticationFailed,
            ControlError::Timeout(_) => FailureKind::Timeout,
            ControlError::TargetNotFound => FailureKind::TargetNotFound,
            ControlError::ActionFailed(_) => FailureKind::ActionFailed,
            ControlError::Io(e) => io_kind(e),
            ControlError::Frame(FrameError::Io(e)) => io_kind(e),
            ControlError::Frame(_) => FailureKind::ProtocolError,
            ControlError::Http(e) if e.is_timeout() => FailureKind::Timeout,
            ControlError::Http(e) if e.is_decode() => FailureKind::ProtocolError,
            ControlError::Http(_) => FailureKind::ConnectionFailed,
            ControlError::WebSocket(tungstenite::Error::Io(e)) => io_kind(e),
            ControlError::WebSocket(
                tungstenite::Error::Protocol(_)
                | tungstenite::Error::Utf8
                | tungstenite::Error::Capacity(_),
            ) => FailureKind::ProtocolError,
            ControlError::WebSocket(_) => FailureKind::ConnectionFailed,
        }
    }

    /// Whether the socket that produced this error can no longer be trusted.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ControlError::ConnectionFailed(_)
                | ControlError::Protocol(_)
                | ControlError::Timeout(_)
                | ControlError::Io(_)
                | ControlError::Frame(_)
                | ControlError::Json(_)
        )
    }
}

fn io_kind(e: &io::Error) -> FailureKind {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureKind::Timeout,
        io::ErrorKind::InvalidData => FailureKind::ProtocolError,
        _ => FailureKind::ConnectionFailed,
    }
}
