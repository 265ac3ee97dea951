use thiserror::Error;

/// Errors produced by the notification client.
///
/// None of these ever reach the host application through the notification
/// path: they are logged and recorded in metrics where they occur. Only
/// startup (configuration, telemetry) surfaces them to the binary.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("No session token available")]
    MissingToken,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Short, stable label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Config(_) => "config",
            ClientError::MalformedMessage(_) => "malformed_message",
            ClientError::Transport(_) => "transport",
            ClientError::ConnectTimeout { .. } => "connect_timeout",
            ClientError::MissingToken => "missing_token",
            ClientError::Io(_) => "io",
            ClientError::Json(_) => "json",
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ClientError::MissingToken.kind(), "missing_token");
        assert_eq!(
            ClientError::MalformedMessage("eof".into()).kind(),
            "malformed_message"
        );
        assert_eq!(
            ClientError::ConnectTimeout { timeout_ms: 10 }.kind(),
            "connect_timeout"
        );
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::transport("connection reset");
        assert_eq!(err.to_string(), "Transport error: connection reset");

        let err = ClientError::ConnectTimeout { timeout_ms: 10_000 };
        assert_eq!(err.to_string(), "Connect timed out after 10000ms");
    }
}
