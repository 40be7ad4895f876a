//! Error types for hashrecord

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable failure codes surfaced to callers.
///
/// The atomic scripts report these in their JSON reply, so the serialized
/// form is the camelCase name (`entityAlreadyExists`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidId,
    NoConnection,
    EntityAlreadyExists,
    EntityNotExist,
    ConditionNotMatch,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidId => "invalidId",
            ErrorCode::NoConnection => "noConnection",
            ErrorCode::EntityAlreadyExists => "entityAlreadyExists",
            ErrorCode::EntityNotExist => "entityNotExist",
            ErrorCode::ConditionNotMatch => "conditionNotMatch",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised at the key-value store boundary
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not reach the store
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// A command or script failed on the store side
    #[error("Store command failed: {0}")]
    Backend(String),

    /// The store answered with something we cannot interpret
    #[error("Malformed store reply: {0}")]
    MalformedReply(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::MalformedReply(err.to_string())
    }
}

/// Errors surfaced by the record facade and the metadata registry
#[derive(Error, Debug)]
pub enum EntityError {
    /// A record type was declared incorrectly
    #[error("({entity}) {message}")]
    Declaration { entity: String, message: String },

    /// An operation failed with a known code; no partial mutation happened
    #[error("({entity}) {message}")]
    Operation {
        code: ErrorCode,
        entity: String,
        message: String,
    },

    /// Persistence was attempted on a type that was never registered
    #[error("({entity}) no such type registered")]
    NotRegistered { entity: String },

    /// A connection with this name was already added
    #[error("A connection with the name \"{name}\" already exists.")]
    ConnectionExists { name: String },

    /// Transport or store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EntityError {
    pub(crate) fn declaration(entity: &str, message: impl Into<String>) -> Self {
        EntityError::Declaration {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn operation(code: ErrorCode, entity: &str, message: impl Into<String>) -> Self {
        EntityError::Operation {
            code,
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    /// The operation code, if this is an operation failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            EntityError::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Shorthand for `self.code() == Some(code)`.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}
