use crate::error_code::ErrorKind;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "providers.openai.models")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "dispatcher")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the prompt kernel.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    /// A dispatch-level failure with its taxonomy kind preserved.
    #[error("Dispatch error [{kind}]: {message}")]
    Dispatch {
        kind: ErrorKind,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn dispatch(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error::Dispatch {
            kind,
            message: msg.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(self, retry_after_ms: Option<u64>) -> Self {
        match self {
            Error::Dispatch { kind, message, .. } => Error::Dispatch {
                kind,
                message,
                retry_after_ms,
            },
            other => other,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// The taxonomy kind of this error.
    ///
    /// Configuration and validation problems are caller-side and map to
    /// `InvalidRequest`; anything that escaped normalization is internal.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Dispatch { kind, .. } => *kind,
            Error::Configuration { .. } | Error::Validation { .. } => ErrorKind::InvalidRequest,
            Error::Transport(crate::transport::TransportError::Timeout(_)) => ErrorKind::Timeout,
            Error::Transport(crate::transport::TransportError::MissingCredential(_)) => {
                ErrorKind::AuthFailure
            }
            _ => ErrorKind::InternalAdapterError,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::Dispatch { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_rendered() {
        let err = Error::configuration_with_context(
            "model set is empty",
            ErrorContext::new()
                .with_field_path("providers.openai.models")
                .with_source("config_validator"),
        );
        let msg = err.to_string();
        assert!(msg.contains("providers.openai.models"));
        assert!(msg.contains("config_validator"));
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn dispatch_kind_is_preserved() {
        let err = Error::dispatch(ErrorKind::ProviderUnavailable, "circuit open")
            .with_retry_after(Some(1500));
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(err.retry_after_ms(), Some(1500));
    }
}
