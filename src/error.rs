//! Error types for armctl.
//!
//! This module defines the error types used throughout armctl. Every error
//! reports an [`ErrorCategory`] so that front ends can tell "the resource does
//! not exist" apart from "the request failed" and "the input was invalid".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for armctl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, used for exit codes and structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The addressed resource (or one of its parents) does not exist.
    NotFound,
    /// A remote request failed, timed out, or was cancelled.
    RequestFailed,
    /// Arguments, schema metadata, manifests, or configuration are invalid.
    ValidationFailed,
}

impl ErrorCategory {
    /// Process exit code for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::RequestFailed => 1,
            ErrorCategory::ValidationFailed => 2,
            ErrorCategory::NotFound => 3,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::NotFound => write!(f, "resource not found"),
            ErrorCategory::RequestFailed => write!(f, "request failed"),
            ErrorCategory::ValidationFailed => write!(f, "validation failed"),
        }
    }
}

/// The kind of failure reported by the remote control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    NotFound,
    Conflict,
    Unauthorized,
    Throttled,
    Unknown,
}

impl RemoteErrorKind {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => RemoteErrorKind::NotFound,
            409 | 412 => RemoteErrorKind::Conflict,
            401 | 403 => RemoteErrorKind::Unauthorized,
            429 => RemoteErrorKind::Throttled,
            _ => RemoteErrorKind::Unknown,
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::NotFound => write!(f, "not found"),
            RemoteErrorKind::Conflict => write!(f, "conflict"),
            RemoteErrorKind::Unauthorized => write!(f, "unauthorized"),
            RemoteErrorKind::Throttled => write!(f, "throttled"),
            RemoteErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failed call against the remote control plane.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("remote operation failed ({kind}{}): {message}", .http_status.map(|s| format!(", HTTP {s}")).unwrap_or_default())]
pub struct RemoteOperationError {
    /// Failure classification
    pub kind: RemoteErrorKind,
    /// Message from the service, or a transport description
    pub message: String,
    /// HTTP status code, when a response was received
    pub http_status: Option<u16>,
    /// Service error code (e.g. `ResourceGroupNotFound`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Server-requested delay before retrying
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl RemoteOperationError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            code: None,
            retry_after: None,
        }
    }

    /// Build an error from an HTTP status, classifying it by status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status: Some(status),
            ..Self::new(RemoteErrorKind::from_status(status), message)
        }
    }

    /// Attach the HTTP status without reclassifying the error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Whether the transport layer may retry the request.
    ///
    /// Throttling and server-side (5xx) failures are transient; connection
    /// failures without a response are treated the same way.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            RemoteErrorKind::Throttled => true,
            RemoteErrorKind::Unknown => self.http_status.map_or(true, |s| s >= 500),
            _ => false,
        }
    }
}

/// Malformed argument-schema or disposition metadata. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A disposition string could not be parsed.
    #[error("argument '{argument}' has malformed disposition '{disposition}': {reason}")]
    MalformedDisposition {
        argument: String,
        disposition: String,
        reason: String,
    },

    /// A field path string could not be parsed.
    #[error("malformed field path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    /// Two arguments project onto the same location.
    #[error("argument '{argument}' maps onto '{path}', which is already occupied")]
    PathConflict { argument: String, path: String },

    /// An argument declares nested options but is not a dict or list.
    #[error("argument '{argument}' declares options but has type '{arg_type}'")]
    OptionsOnScalar { argument: String, arg_type: String },

    /// A resource id template references an unknown argument.
    #[error("resource type '{resource_type}' id template references unknown argument '{placeholder}'")]
    UnknownPlaceholder {
        resource_type: String,
        placeholder: String,
    },

    /// A value transform is unusable as declared.
    #[error("argument '{argument}' has an invalid transform: {reason}")]
    InvalidTransform { argument: String, reason: String },
}

/// The main error type for armctl.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input Errors
    // ========================================================================
    /// Malformed schema metadata.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Missing required argument.
    #[error("missing required argument: {0}")]
    MissingArgument(String),

    /// Provided argument does not satisfy the schema.
    #[error("invalid argument '{argument}': {message}")]
    InvalidArgument {
        /// Argument name (dotted for nested options)
        argument: String,
        /// Error message
        message: String,
    },

    /// No resource type with the given name is registered.
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),

    /// Manifest could not be loaded.
    #[error("failed to load manifest '{path}': {message}")]
    Manifest {
        /// Path to the manifest
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// A remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteOperationError),

    /// A long-running operation did not finish before its deadline.
    #[error("operation '{operation}' timed out after {}s", .timeout.as_secs())]
    OperationTimedOut {
        /// Operation description
        operation: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// A long-running operation reached a terminal failure state.
    #[error("operation failed: {reason}")]
    OperationFailed {
        /// Failure reason reported by the service
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("operation '{0}' was cancelled")]
    Cancelled(String),

    // ========================================================================
    // Plumbing
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`].
    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            argument: argument.into(),
            message: message.into(),
        }
    }

    /// Classify this error for exit codes and structured reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Remote(e) if e.kind == RemoteErrorKind::NotFound => ErrorCategory::NotFound,
            Error::Remote(_)
            | Error::OperationTimedOut { .. }
            | Error::OperationFailed { .. }
            | Error::Cancelled(_)
            | Error::Io(_) => ErrorCategory::RequestFailed,
            Error::Schema(_)
            | Error::MissingArgument(_)
            | Error::InvalidArgument { .. }
            | Error::UnknownResourceType(_)
            | Error::Manifest { .. }
            | Error::Config(_)
            | Error::Json(_)
            | Error::Yaml(_) => ErrorCategory::ValidationFailed,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// Structured representation for JSON output.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "failed": true,
            "category": self.category(),
            "msg": self.to_string(),
        });
        if let Error::Remote(remote) = self {
            value["remote"] = serde_json::to_value(remote).unwrap_or_default();
        }
        value
    }
}
