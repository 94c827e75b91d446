//! Error types for the session grid.
//!
//! Transient routing failures (`Unavailable`, `WrongOwner`, `Transport`,
//! `Timeout`) are retried by the map's router before they reach a caller.
//! Data-integrity outcomes (`VersionConflict`, `AlreadyExists`,
//! `SessionConflict`, `Serialization`) are never retried.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    // === Membership ===
    #[error("membership error: {0}")]
    Membership(String),

    // === Routing ===
    #[error("partition {partition} unavailable: {reason}")]
    Unavailable { partition: u32, reason: String },

    #[error("not the owner of partition {partition} (view {view_version})")]
    WrongOwner { partition: u32, view_version: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    // === Data integrity ===
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    SessionConflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // === Queries ===
    #[error("no index defined for attribute '{0}'")]
    NoSuchIndex(String),

    #[error("index on '{0}' does not support range queries")]
    RangeUnsupported(String),

    // === Config ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GridError {
    pub fn session_exists(id: &str) -> Self {
        tracing::debug!("Rejecting re-creation of session {}", id);
        GridError::SessionConflict("Session already exists".to_string())
    }

    /// Is this a transient error worth retrying against a refreshed view?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::Unavailable { .. }
                | GridError::WrongOwner { .. }
                | GridError::Transport(_)
                | GridError::Timeout(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GridError::Unavailable { .. } | GridError::Membership(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GridError::WrongOwner { .. } => StatusCode::MISDIRECTED_REQUEST,
            GridError::VersionConflict { .. }
            | GridError::AlreadyExists(_)
            | GridError::SessionConflict(_) => StatusCode::CONFLICT,
            GridError::Serialization(_)
            | GridError::NoSuchIndex(_)
            | GridError::RangeUnsupported(_)
            | GridError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            GridError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GridError::Transport(_) => StatusCode::BAD_GATEWAY,
            GridError::Io(_) | GridError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire form of a `GridError`, returned by the internal HTTP endpoints so the
/// calling node can rebuild the exact error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Membership,
    Unavailable,
    WrongOwner,
    Transport,
    Timeout,
    VersionConflict,
    AlreadyExists,
    SessionConflict,
    Serialization,
    NoSuchIndex,
    RangeUnsupported,
    InvalidConfig,
    Io,
    Internal,
}

impl From<&GridError> for ErrorBody {
    fn from(err: &GridError) -> Self {
        let mut body = ErrorBody {
            kind: ErrorKind::Internal,
            message: err.to_string(),
            partition: None,
            key: None,
            expected: None,
            actual: None,
        };
        match err {
            GridError::Membership(m) => {
                body.kind = ErrorKind::Membership;
                body.message = m.clone();
            }
            GridError::Unavailable { partition, reason } => {
                body.kind = ErrorKind::Unavailable;
                body.partition = Some(*partition);
                body.message = reason.clone();
            }
            GridError::WrongOwner {
                partition,
                view_version,
            } => {
                body.kind = ErrorKind::WrongOwner;
                body.partition = Some(*partition);
                body.actual = Some(*view_version);
            }
            GridError::Transport(m) => {
                body.kind = ErrorKind::Transport;
                body.message = m.clone();
            }
            GridError::Timeout(m) => {
                body.kind = ErrorKind::Timeout;
                body.message = m.clone();
            }
            GridError::VersionConflict {
                key,
                expected,
                actual,
            } => {
                body.kind = ErrorKind::VersionConflict;
                body.key = Some(key.clone());
                body.expected = Some(*expected);
                body.actual = Some(*actual);
            }
            GridError::AlreadyExists(key) => {
                body.kind = ErrorKind::AlreadyExists;
                body.key = Some(key.clone());
            }
            GridError::SessionConflict(m) => {
                body.kind = ErrorKind::SessionConflict;
                body.message = m.clone();
            }
            GridError::Serialization(m) => {
                body.kind = ErrorKind::Serialization;
                body.message = m.clone();
            }
            GridError::NoSuchIndex(attr) => {
                body.kind = ErrorKind::NoSuchIndex;
                body.key = Some(attr.clone());
            }
            GridError::RangeUnsupported(attr) => {
                body.kind = ErrorKind::RangeUnsupported;
                body.key = Some(attr.clone());
            }
            GridError::InvalidConfig(m) => {
                body.kind = ErrorKind::InvalidConfig;
                body.message = m.clone();
            }
            GridError::Io(m) => {
                body.kind = ErrorKind::Io;
                body.message = m.clone();
            }
            GridError::Internal(m) => {
                body.message = m.clone();
            }
        }
        body
    }
}

impl From<ErrorBody> for GridError {
    fn from(body: ErrorBody) -> Self {
        let partition = body.partition.unwrap_or_default();
        let key = body.key.unwrap_or_default();
        match body.kind {
            ErrorKind::Membership => GridError::Membership(body.message),
            ErrorKind::Unavailable => GridError::Unavailable {
                partition,
                reason: body.message,
            },
            ErrorKind::WrongOwner => GridError::WrongOwner {
                partition,
                view_version: body.actual.unwrap_or_default(),
            },
            ErrorKind::Transport => GridError::Transport(body.message),
            ErrorKind::Timeout => GridError::Timeout(body.message),
            ErrorKind::VersionConflict => GridError::VersionConflict {
                key,
                expected: body.expected.unwrap_or_default(),
                actual: body.actual.unwrap_or_default(),
            },
            ErrorKind::AlreadyExists => GridError::AlreadyExists(key),
            ErrorKind::SessionConflict => GridError::SessionConflict(body.message),
            ErrorKind::Serialization => GridError::Serialization(body.message),
            ErrorKind::NoSuchIndex => GridError::NoSuchIndex(key),
            ErrorKind::RangeUnsupported => GridError::RangeUnsupported(key),
            ErrorKind::InvalidConfig => GridError::InvalidConfig(body.message),
            ErrorKind::Io => GridError::Io(body.message),
            ErrorKind::Internal => GridError::Internal(body.message),
        }
    }
}

impl IntoResponse for GridError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

impl From<std::io::Error> for GridError {
    fn from(e: std::io::Error) -> Self {
        GridError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self {
        GridError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for GridError {
    fn from(e: bincode::Error) -> Self {
        GridError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for GridError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GridError::Timeout(e.to_string())
        } else if e.is_decode() {
            GridError::Serialization(e.to_string())
        } else {
            GridError::Transport(e.to_string())
        }
    }
}

impl From<config::ConfigError> for GridError {
    fn from(e: config::ConfigError) -> Self {
        GridError::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_preserves_version_conflict() {
        let err = GridError::VersionConflict {
            key: "s-1".to_string(),
            expected: 3,
            actual: 4,
        };

        let body = ErrorBody::from(&err);
        let json = serde_json::to_string(&body).unwrap();
        let restored: GridError = serde_json::from_str::<ErrorBody>(&json).unwrap().into();

        assert_eq!(restored, err);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            GridError::WrongOwner {
                partition: 1,
                view_version: 2
            }
            .is_retryable()
        );
        assert!(GridError::Timeout("x".into()).is_retryable());
        assert!(!GridError::SessionConflict("Session already exists".into()).is_retryable());
        assert!(!GridError::Serialization("bad".into()).is_retryable());
    }
}
