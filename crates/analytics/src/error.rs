//! Analytics error types

use thiserror::Error;
use uuid::Uuid;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Business {0} not found")]
    BusinessNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for AnalyticsError {
    fn from(e: sqlx::Error) -> Self {
        AnalyticsError::Database(e.to_string())
    }
}
