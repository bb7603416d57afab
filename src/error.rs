use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed by server (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Access credentials expired")]
    AuthExpired,

    #[error("Reconnect refused: auth expired again within the {0:?} cooldown")]
    ReconnectRefused(Duration),

    #[error("Credential refresh failed: {0}")]
    CredentialRefresh(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Command rejected with status {status}: {detail}")]
    CommandRejected { status: u16, detail: String },

    #[error("Invalid subscription target: {0}")]
    InvalidTarget(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FleetError {
    /// Stable machine-readable code for log fields and scripted consumers.
    pub fn to_error_code(&self) -> &'static str {
        match self {
            FleetError::Transport(_) => "TRANSPORT_ERROR",
            FleetError::ConnectionClosed { .. } => "CONNECTION_CLOSED",
            FleetError::AuthExpired => "AUTH_EXPIRED",
            FleetError::ReconnectRefused(_) => "RECONNECT_REFUSED",
            FleetError::CredentialRefresh(_) => "CREDENTIAL_REFRESH_FAILED",
            FleetError::Http(_) => "HTTP_ERROR",
            FleetError::CommandRejected { .. } => "COMMAND_REJECTED",
            FleetError::InvalidTarget(_) => "INVALID_TARGET",
            FleetError::Url(_) => "INVALID_URL",
            _ => "INTERNAL_ERROR",
        }
    }

}

pub type Result<T> = std::result::Result<T, FleetError>;
