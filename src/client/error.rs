use crate::models::protocol::ErrorBody;
use reqwest::StatusCode;
use std::io;
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, timeout or throttling failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// 5xx from the server.
    #[error("server error {status} ({category}): {message}")]
    Server {
        status: u16,
        category: String,
        message: String,
    },
    /// The session is unknown to the server (expired, swept or aborted).
    #[error("upload session rejected: {0}")]
    Session(String),
    /// Any other 4xx.
    #[error("request rejected {status} ({category}): {message}")]
    Rejected {
        status: u16,
        category: String,
        message: String,
        missing_chunks: Option<Vec<u32>>,
    },
    #[error("upload aborted")]
    Aborted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Coarse classification surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Transport(_) => "transport",
            ClientError::Server { category, .. } if category == "storage" => "storage",
            ClientError::Server { .. } => "transport",
            ClientError::Session(_) => "session",
            ClientError::Rejected { category, .. } if category == "incomplete" => "incomplete",
            ClientError::Rejected { .. } => "rejected",
            ClientError::Aborted => "aborted",
            ClientError::Io(_) => "io",
        }
    }

    /// Storage failures are not retried: repeating the request will not free
    /// disk space.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Server { category, .. } => category != "storage",
            _ => false,
        }
    }

    /// Build an error from a non-success response.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
        let (category, message, missing_chunks) = match body {
            Some(b) => (b.category, b.error, b.missing_chunks),
            None => ("unknown".to_string(), text, None),
        };

        match status {
            StatusCode::NOT_FOUND => ClientError::Session(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                ClientError::Transport(format!("{}: {}", status, message))
            }
            s if s.is_server_error() => {
                // body-less 5xx from proxies still count as server trouble
                let category = if status == StatusCode::INSUFFICIENT_STORAGE {
                    "storage".to_string()
                } else {
                    category
                };
                ClientError::Server {
                    status: s.as_u16(),
                    category,
                    message,
                }
            }
            s => ClientError::Rejected {
                status: s.as_u16(),
                category,
                message,
                missing_chunks,
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::Transport("request timeout".to_string())
        } else if error.is_connect() {
            ClientError::Transport(format!("connection failed: {}", error))
        } else if error.is_decode() {
            ClientError::Rejected {
                status: 0,
                category: "decode".into(),
                message: error.to_string(),
                missing_chunks: None,
            }
        } else {
            ClientError::Transport(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(category: &str) -> ClientError {
        ClientError::Server {
            status: 500,
            category: category.into(),
            message: "m".into(),
        }
    }

    #[test]
    fn test_kinds_and_retryability() {
        assert_eq!(ClientError::Transport("x".into()).kind(), "transport");
        assert!(ClientError::Transport("x".into()).is_retryable());

        assert_eq!(server("internal").kind(), "transport");
        assert!(server("internal").is_retryable());
        assert_eq!(server("storage").kind(), "storage");
        assert!(!server("storage").is_retryable());

        let session = ClientError::Session("gone".into());
        assert_eq!(session.kind(), "session");
        assert!(!session.is_retryable());

        let incomplete = ClientError::Rejected {
            status: 409,
            category: "incomplete".into(),
            message: "m".into(),
            missing_chunks: Some(vec![1]),
        };
        assert_eq!(incomplete.kind(), "incomplete");
        assert!(!incomplete.is_retryable());
        assert!(!ClientError::Aborted.is_retryable());
    }
}
