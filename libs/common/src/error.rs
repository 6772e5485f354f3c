//! Custom error types for the common library
//!
//! This module defines the storage error type shared by every repository in
//! the workspace.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// A unique constraint rejected the write
    #[error("Duplicate value for {0}")]
    Duplicate(String),
}

impl DatabaseError {
    /// Classify a query error, turning unique violations into `Duplicate`
    pub fn from_query(err: SqlxError) -> Self {
        let constraint = match &err {
            SqlxError::Database(db) if db.is_unique_violation() => {
                Some(db.constraint().unwrap_or("unique constraint").to_string())
            }
            _ => None,
        };

        match constraint {
            Some(constraint) => DatabaseError::Duplicate(constraint),
            None => DatabaseError::Query(err),
        }
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
