//! Error types for the live channel, the REST client and local config.

use thiserror::Error;

/// Errors surfaced by the REST client.
///
/// Every REST failure reaches the view-models as one of these; nothing is
/// allowed to escape as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Network failures, timeouts, 5xx and 429 may succeed on retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Decode(_) | ApiError::InvalidUrl(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// User-facing wording for an inline error banner.
    pub fn presentation(&self) -> ErrorPresentation {
        let (title, message) = match self {
            ApiError::Network(_) => (
                "Connection problem",
                "Could not reach the server. Check that it is running.".to_string(),
            ),
            ApiError::Timeout => (
                "Request timed out",
                "The server took too long to respond.".to_string(),
            ),
            ApiError::Status { status: 401, .. } => (
                "Not signed in",
                "Your session is missing or expired. Log in again.".to_string(),
            ),
            ApiError::Status { status: 403, .. } => (
                "Not allowed",
                "You do not have access to this run.".to_string(),
            ),
            ApiError::Status { status: 404, .. } => (
                "Not found",
                "The run no longer exists.".to_string(),
            ),
            ApiError::Status { status: 429, .. } => (
                "Too many requests",
                "The server is rate limiting requests. Try again shortly.".to_string(),
            ),
            ApiError::Status {
                status, message, ..
            } if *status >= 500 => ("Server error", message.clone()),
            ApiError::Status { message, .. } => ("Request rejected", message.clone()),
            ApiError::Decode(_) => (
                "Unexpected response",
                "The server sent data this client does not understand.".to_string(),
            ),
            ApiError::InvalidUrl(url) => ("Invalid server address", url.clone()),
        };
        ErrorPresentation {
            title: title.to_string(),
            message,
            retry: self.is_recoverable(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                code: None,
                message: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Title/message/action triple shown for a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    /// Whether a "Retry" action should be offered.
    pub retry: bool,
}

/// Socket-level failures. These never leave the transport task; they are
/// reported as channel events and degrade the connection status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open live channel: {0}")]
    Connect(String),

    #[error("live channel error: {0}")]
    Socket(String),

    #[error("invalid live channel url: {0}")]
    InvalidUrl(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Socket(err.to_string())
    }
}

/// Problems reading or writing local config and session files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid session file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no home directory to place data under")]
    NoHomeDir,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            code: None,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn recoverability_follows_status_class() {
        assert!(ApiError::Network("refused".into()).is_recoverable());
        assert!(ApiError::Timeout.is_recoverable());
        assert!(status(500).is_recoverable());
        assert!(status(503).is_recoverable());
        assert!(status(429).is_recoverable());
        assert!(!status(400).is_recoverable());
        assert!(!status(404).is_recoverable());
        assert!(!ApiError::Decode("bad".into()).is_recoverable());
    }

    #[test]
    fn presentation_offers_retry_only_when_recoverable() {
        let p = ApiError::Timeout.presentation();
        assert_eq!(p.title, "Request timed out");
        assert!(p.retry);

        let p = status(404).presentation();
        assert_eq!(p.title, "Not found");
        assert!(!p.retry);
    }

    #[test]
    fn server_error_presentation_carries_message() {
        let p = status(502).presentation();
        assert_eq!(p.title, "Server error");
        assert_eq!(p.message, "boom");
        assert!(p.retry);
    }
}
