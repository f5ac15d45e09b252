use drona_core::error::{RetrieverError, SchemaError};
use serde_json::Value;
use thiserror::Error;

/// Dashboard call errors outside the retriever path.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(String),
    #[error("{message} (status {status})")]
    Status {
        status: u16,
        message: String,
        details: Value,
    },
    #[error("response error: {0}")]
    Response(String),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The `{message, status_code, details}` shape the composer's error slot
    /// holds.
    pub fn to_retriever_error(&self) -> RetrieverError {
        match self {
            Self::Http(message) => RetrieverError::network(message.clone()),
            Self::Status {
                status,
                message,
                details,
            } => RetrieverError::Backend {
                message: message.clone(),
                status_code: *status,
                details: details.clone(),
            },
            Self::Response(message) => RetrieverError::network(message.clone()),
            Self::Schema(error) => RetrieverError::Backend {
                message: error.to_string(),
                status_code: 200,
                details: Value::String(String::new()),
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

/// Split a failed response body into `(message, details)` the way the
/// dashboard reports errors: JSON `{message, details}` when possible, the
/// `fallback` message and the raw body otherwise.
pub(crate) fn error_parts(body: &str, fallback: &str) -> (String, Value) {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(fallback)
                .to_string();
            let details = map
                .get("details")
                .filter(|d| !d.is_null())
                .cloned()
                .unwrap_or(Value::Object(map));
            (message, details)
        }
        _ => (fallback.to_string(), Value::String(body.to_string())),
    }
}
