//! Billing error types

use thiserror::Error;
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing configuration error: {0}")]
    Config(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Business {0} not found")]
    BusinessNotFound(Uuid),

    /// Another Fix run holds the per-business lock
    #[error("Stripe sync already in progress for business {0}")]
    SyncInProgress(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

impl BillingError {
    /// True for errors caused by the caller rather than by a collaborator
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::BusinessNotFound(_)
                | BillingError::SyncInProgress(_)
                | BillingError::InvalidInput(_)
        )
    }
}
