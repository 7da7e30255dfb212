//! Error taxonomy shared by every subsystem: bit stream, schema model,
//! validator and codec engine.
//!
//! Every variant carries a stable human-readable message; callers
//! pattern-match on substrings of the `Display` output (`"not found"`,
//! `"circular back_reference"`, `"index out of bounds"`, ...).

use thiserror::Error;

/// Unified error type for the whole crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BinSchemaError {
    /// Raised by the validator: the schema itself is malformed.
    #[error("schema invalid at {path}: {message}")]
    SchemaInvalid { path: String, message: String },

    /// Raised by the bit stream: a read or write falls outside the buffer.
    #[error("Position {position} exceeds file size {size}: Insufficient bytes (requested length {length})")]
    BoundsExceeded {
        position: i64,
        length: usize,
        size: i64,
    },

    /// Raised by the bit stream: random access attempted on a source that
    /// cannot buffer far enough back to satisfy it.
    #[error("stream is not seekable: {message}")]
    NotSeekable { message: String },

    /// Raised by the codec engine while encoding.
    #[error("encoding error: {message}")]
    EncodingError { message: String },

    /// Raised by the codec engine while decoding.
    #[error("decoding error: {message}")]
    DecodingError { message: String },

    /// Raised by the back-reference decoder: a pointer chain revisited an
    /// offset within a single root decode call.
    #[error("circular back_reference detected at offset {offset}")]
    CircularReference { offset: i64 },

    /// Raised when a `same_index<T>` selector resolves to a different
    /// concrete type than requested.
    #[error("Expected {expected} at {location} but found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        location: String,
    },
}

impl BinSchemaError {
    pub fn schema_invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        BinSchemaError::SchemaInvalid {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        BinSchemaError::EncodingError {
            message: message.into(),
        }
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        BinSchemaError::DecodingError {
            message: message.into(),
        }
    }

    /// True for errors that a conditional-expression evaluation should
    /// silently coerce to `false` rather than bubble up (§4.C "Safety").
    pub fn is_soft_in_conditional(&self) -> bool {
        matches!(
            self,
            BinSchemaError::DecodingError { .. } | BinSchemaError::EncodingError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BinSchemaError>;
