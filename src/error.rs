//! Error taxonomy shared by the catalog, row store, SQL layer and wire server.
//!
//! Every variant renders to the human readable text that ends up in the
//! `M` field of a wire `ErrorResponse`.

use thiserror::Error;

/// Result alias used across the crate.
pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Malformed SQL text. Carries the parser message verbatim.
    #[error("{0}")]
    Parse(String),

    /// Valid SQL outside the supported statement or expression subset.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("table \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("table \"{0}\" does not exist")]
    NotFound(String),

    #[error("row with id \"{id}\" not found in table \"{table}\"")]
    RowNotFound { table: String, id: String },

    #[error("column \"{column}\" of relation \"{table}\" does not exist")]
    UnknownColumn { table: String, column: String },

    #[error("invalid table name \"{0}\"")]
    InvalidName(String),

    #[error("INSERT has {found} values but {expected} target columns")]
    ValueCountMismatch { expected: usize, found: usize },

    #[error("null value in column \"{column}\" of relation \"{table}\" violates not-null constraint")]
    NotNullViolation { table: String, column: String },

    #[error("column \"{column}\" of relation \"{table}\" cannot be updated")]
    ImmutableColumn { table: String, column: String },

    #[error("duplicate key value violates unique constraint: id \"{id}\" already exists in \"{table}\"")]
    DuplicateKey { table: String, id: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt record in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),

    /// Malformed or truncated wire message. Fatal for the connection.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_) | DbError::RowNotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, DbError::AlreadyExists(_))
    }

    pub fn is_unknown_column(&self) -> bool {
        matches!(self, DbError::UnknownColumn { .. })
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DbError::DuplicateKey { .. })
    }

    /// Errors that must tear down a client connection instead of being
    /// reported in-band.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, DbError::Protocol(_))
    }

    /// SQLSTATE code sent in the `C` field of an ErrorResponse.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            DbError::Parse(_) | DbError::ValueCountMismatch { .. } => "42601",
            DbError::Unsupported(_) | DbError::ImmutableColumn { .. } => "0A000",
            DbError::AlreadyExists(_) => "42P07",
            DbError::NotFound(_) => "42P01",
            DbError::RowNotFound { .. } => "02000",
            DbError::UnknownColumn { .. } => "42703",
            DbError::InvalidName(_) => "42602",
            DbError::NotNullViolation { .. } => "23502",
            DbError::DuplicateKey { .. } => "23505",
            DbError::Protocol(_) => "08P01",
            DbError::Io(_) | DbError::Json(_) | DbError::Corrupt { .. } | DbError::Internal(_) => {
                "XX000"
            }
        }
    }
}
