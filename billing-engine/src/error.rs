//! Error type shared by every engine operation.
//!
//! Lock contention and "not due yet" are never errors: `bill` reports them as
//! `Ok(None)`. Everything here is either a business-rule violation an API
//! layer would surface as a 4xx, or an infrastructure failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Pricing error: {0}")]
    Pricing(anyhow::Error),

    #[error("Payment error: {0}")]
    Payment(anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<config::ConfigError> for BillingError {
    fn from(err: config::ConfigError) -> Self {
        BillingError::ConfigError(anyhow::Error::new(err))
    }
}

impl BillingError {
    /// Whether this error maps to a client-facing 4xx-equivalent response.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_)
                | BillingError::InvalidState(_)
                | BillingError::NotFound(_)
                | BillingError::Conflict(_)
        )
    }
}
