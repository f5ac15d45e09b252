//! Error taxonomy shared by the client, the controllers and the composer.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Schema parsing errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// Failure of a retriever invocation or of any other dashboard call that
/// reports through the same `{message, status_code, details}` shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrieverError {
    /// Missing retriever path or required field; never reaches the network.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    /// The request could not be sent or the body could not be read.
    #[error("network error: {message}")]
    Network { message: String },
    /// Non-2xx response.
    #[error("backend error ({status_code}): {message}")]
    Backend {
        message: String,
        status_code: u16,
        details: Value,
    },
}

impl RetrieverError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration { message }
            | Self::Network { message }
            | Self::Backend { message, .. } => message,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration { .. } => 400,
            Self::Network { .. } => 0,
            Self::Backend { status_code, .. } => *status_code,
        }
    }

    /// Structured form handed to error sinks and shown in the UI.
    pub fn report(&self) -> ErrorReport {
        let details = match self {
            Self::Backend { details, .. } => details.clone(),
            _ => Value::String(String::new()),
        };
        ErrorReport {
            message: self.message().to_string(),
            status_code: self.status_code(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub status_code: u16,
    pub details: Value,
}

/// Caller-supplied destination for errors caught at controller boundaries.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &RetrieverError);
}

/// Drops every report.
pub struct NoopErrorSink;

impl ErrorSink for NoopErrorSink {
    fn report(&self, _error: &RetrieverError) {}
}

/// Keeps reports in memory.
#[derive(Default)]
pub struct CollectingErrorSink {
    errors: Mutex<Vec<RetrieverError>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<RetrieverError> {
        self.errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<RetrieverError> {
        self.errors
            .lock()
            .ok()
            .and_then(|errors| errors.last().cloned())
    }

    pub fn clear(&self) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.clear();
        }
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, error: &RetrieverError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error.clone());
        }
    }
}
