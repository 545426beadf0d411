//! Error types shared by the copydesk crates.

/// Errors raised by the durable key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store io error at {path}: {source}")]
    Io {
        /// Backing file path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file or a stored value is not valid JSON.
    #[error("store json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the session client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `send` was called before any connection was initialized.
    #[error("API not initialized")]
    NotInitialized,

    /// The socket closed before the request resolved.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport failed to open or write.
    #[error("transport error: {0}")]
    Transport(String),

    /// The trading API answered with an `error` object.
    #[error("api error {code}: {message}")]
    Api {
        /// Error code reported by the API.
        code: String,
        /// Human-readable message reported by the API.
        message: String,
    },

    /// A response arrived but did not have the expected shape.
    #[error("unexpected response to {request}: {body}")]
    UnexpectedResponse {
        /// Request name the response belongs to.
        request: String,
        /// Raw response body.
        body: String,
    },

    /// No auth token is available for the active account.
    #[error("no auth token available, log in first")]
    MissingToken,

    /// Caller supplied an unusable argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A request or response could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    /// Build an [`ClientError::Api`] from the `error` object of a response.
    pub fn from_api_error(error: &serde_json::Value) -> Self {
        let field = |name: &str| {
            error
                .get(name)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self::Api {
            code: field("code"),
            message: field("message"),
        }
    }

    /// Whether the error means the socket is gone and a reconnect is pending.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn not_initialized_message() {
        assert_eq!(ClientError::NotInitialized.to_string(), "API not initialized");
    }

    #[test]
    fn api_error_from_response_object() {
        let err = ClientError::from_api_error(&json!({
            "code": "InvalidToken",
            "message": "The token is invalid."
        }));
        assert_matches!(err, ClientError::Api { ref code, ref message } => {
            assert_eq!(code, "InvalidToken");
            assert_eq!(message, "The token is invalid.");
        });
        assert_eq!(err.to_string(), "api error InvalidToken: The token is invalid.");
    }

    #[test]
    fn api_error_missing_fields_are_empty() {
        let err = ClientError::from_api_error(&json!({}));
        assert_matches!(err, ClientError::Api { code, message } => {
            assert!(code.is_empty());
            assert!(message.is_empty());
        });
    }

    #[test]
    fn connection_errors_classified() {
        assert!(ClientError::ConnectionClosed.is_connection_error());
        assert!(ClientError::Transport("refused".into()).is_connection_error());
        assert!(!ClientError::NotInitialized.is_connection_error());
        assert!(!ClientError::MissingToken.is_connection_error());
    }

    #[test]
    fn store_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ClientError = StoreError::from(json_err).into();
        assert_matches!(err, ClientError::Store(StoreError::Json(_)));
    }
}
