use rust_decimal::Decimal;

use crate::domain::{AccountId, Currency};

/// Outcome of a failed transfer attempt.
///
/// Business rejections (`InvalidRequest`, `AccountNotFound`, `CurrencyMismatch`,
/// `InsufficientBalance`) leave every balance untouched and are never retried by
/// the engine. `ResourceUnavailable` may be retried later with a fresh
/// transaction. `Integrity` and `Database` are fatal and halt a benchmark run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Can't transfer between different currencies")]
    CurrencyMismatch,

    #[error("Not enough balance on account {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        account: AccountId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl TransferError {
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::CurrencyMismatch => "CURRENCY_MISMATCH",
            TransferError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TransferError::Integrity(_) => "INTEGRITY_ERROR",
            TransferError::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
            TransferError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Rejected by a business rule before any row was mutated.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidRequest(_)
                | TransferError::AccountNotFound(_)
                | TransferError::CurrencyMismatch
                | TransferError::InsufficientBalance { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Integrity(_) | TransferError::Database(_))
    }
}

// SQLSTATEs that mean "try again later": lock_not_available, deadlock_detected,
// serialization_failure, query_canceled.
const RETRYABLE_SQLSTATES: [&str; 4] = ["55P03", "40P01", "40001", "57014"];

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                TransferError::ResourceUnavailable(e.to_string())
            }
            sqlx::Error::Database(db)
                if db
                    .code()
                    .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref())) =>
            {
                TransferError::ResourceUnavailable(e.to_string())
            }
            _ => TransferError::Database(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("Ingestion failed with: {0}")]
    Ingestion(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Total {currency} amount changed (before/after) {before}/{after}")]
    ConservationViolated {
        currency: Currency,
        before: Decimal,
        after: Decimal,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TransferError::CurrencyMismatch.is_rejection());
        assert!(TransferError::InvalidRequest("self".into()).is_rejection());
        assert!(!TransferError::ResourceUnavailable("pool".into()).is_rejection());
        assert!(!TransferError::ResourceUnavailable("pool".into()).is_fatal());
        assert!(TransferError::Integrity("0 rows".into()).is_fatal());
        assert!(TransferError::Database("broken pipe".into()).is_fatal());
    }

    #[test]
    fn pool_timeout_is_resource_unavailable() {
        let err: TransferError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), "RESOURCE_UNAVAILABLE");

        let err: TransferError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[test]
    fn display() {
        let err = TransferError::InsufficientBalance {
            account: 7,
            available: Decimal::from(3),
            requested: Decimal::from(5),
        };
        assert_eq!(
            err.to_string(),
            "Not enough balance on account 7: available 3, requested 5"
        );
    }
}
