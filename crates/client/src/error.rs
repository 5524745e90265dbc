//! Error taxonomy for the tool-invocation client.

use serde_json::Value;

use crate::protocol::{JsonRpcError, RESOURCE_NOT_FOUND};

/// Errors surfaced by [`Session`](crate::session::Session) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The channel could not be established, or dropped unexpectedly.
    #[error("connection: {0}")]
    Connection(String),

    /// No response arrived within the configured deadline.
    #[error("timeout: no response to {method} within {after_ms}ms")]
    Timeout { method: String, after_ms: u64 },

    /// Malformed message, unknown identifier, or missing required field.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Locally-detected invalid call arguments, rejected before transmission.
    #[error("validation: {0}")]
    Validation(String),

    /// The remote explicitly returned an error object. Code, message and
    /// data are carried verbatim, never reinterpreted.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The remote reported the requested resource URI unknown.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<JsonRpcError> for ClientError {
    fn from(err: JsonRpcError) -> Self {
        ClientError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl ClientError {
    /// Whether a remote error object denotes an unknown resource URI.
    pub(crate) fn is_resource_not_found(err: &JsonRpcError) -> bool {
        err.code == RESOURCE_NOT_FOUND || err.message.to_lowercase().contains("not found")
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
