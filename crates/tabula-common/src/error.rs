//! Error types for Tabula.

use thiserror::Error;

/// Result type alias using TabulaError.
pub type Result<T> = std::result::Result<T, TabulaError>;

/// Errors that can occur in Tabula operations.
#[derive(Debug, Error)]
pub enum TabulaError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Page errors
    #[error("Page corrupted: {page_no}, reason: {reason}")]
    PageCorrupted { page_no: u32, reason: String },

    #[error("Page {page_no} out of range (file has {num_pages} pages)")]
    PageOutOfRange { page_no: u32, num_pages: u32 },

    // Value errors
    #[error("Format error: {0}")]
    Format(String),

    #[error("Type mismatch on column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("Null value not allowed in column {column}")]
    NullNotAllowed { column: String },

    // Capacity errors
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    // Constraint errors
    #[error("Unique constraint violated on {table}.{column}")]
    UniqueViolation { table: String, column: String },

    // Catalog errors
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Row {row_id} not found in table {table}")]
    RowNotFound { table: String, row_id: u32 },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TabulaError {
    /// Returns true for errors raised by the page I/O layer.
    pub fn is_page_io(&self) -> bool {
        matches!(
            self,
            TabulaError::Io(_) | TabulaError::PageCorrupted { .. } | TabulaError::PageOutOfRange { .. }
        )
    }

    /// Returns true for errors raised while encoding or validating a value.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            TabulaError::Format(_)
                | TabulaError::TypeMismatch { .. }
                | TabulaError::ColumnCountMismatch { .. }
                | TabulaError::NullNotAllowed { .. }
        )
    }
}
