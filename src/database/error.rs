use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Record not found")]
    NotFound,

    #[error("Unique constraint violation: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Connection pool timed out")]
    PoolTimeout,

    #[error("Database error: {message}")]
    Other { message: String },
}

impl DatabaseError {
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::PoolTimedOut => DatabaseError::PoolTimeout,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                }
            }
            _ => DatabaseError::Other {
                message: error.to_string(),
            },
        }
    }

    /// Pool exhaustion is worth retrying; constraint violations and missing
    /// rows are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::PoolTimeout)
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::from_sqlx(error)
    }
}
