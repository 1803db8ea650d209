//! Unified error type for the ledger, subscription and commission core.
//!
//! Variants carry the figures a caller needs to render an actionable message
//! (for example both the required and the available balance) so the UI layer
//! never has to re-query after a failure.

use crate::entities::sea_orm_active_enums::Currency;
use rust_decimal::Decimal;
use sea_orm::DbErr;
use thiserror::Error;

/// Errors produced by every public operation of the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A debit asked for more than the balance holds. Nothing was applied.
    #[error("Insufficient {currency} balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Currency that was short
        currency: Currency,
        /// Amount the operation needed
        required: i64,
        /// Balance at the time of the attempt
        available: i64,
    },

    /// The site already has an ACTIVE subscription.
    #[error("Site {site_id} already has an active subscription")]
    SubscriptionConflict {
        /// Site the conflicting subscription belongs to
        site_id: i64,
    },

    /// The plan id is unknown or missing from the loaded catalog.
    #[error("Invalid plan: {plan}")]
    InvalidPlan {
        /// The rejected plan id
        plan: String,
    },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record ("user", "site", ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The store gave up on the transaction: the final commit failed, or the
    /// database was busy or locked mid-way. Nothing was applied and the whole
    /// call is safe to retry.
    #[error("Transaction aborted: {source}")]
    TransactionAborted {
        /// Store-level cause
        source: DbErr,
    },

    /// Ledger amounts must be strictly positive.
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: i64,
    },

    /// Commission rates are percentages between 0 and 100.
    #[error("Invalid commission rate: {rate}")]
    InvalidRate {
        /// The rejected rate
        rate: Decimal,
    },

    /// A state machine refused the requested move.
    #[error("Cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        /// Which state machine ("subscription" or "commission")
        entity: &'static str,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// The requesting user does not own the site.
    #[error("Site {site_id} does not belong to user {user_id}")]
    NotSiteOwner {
        /// Site that was addressed
        site_id: i64,
        /// User that made the request
        user_id: i64,
    },

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
    },

    /// Any other store-level failure.
    #[error("Database error: {0}")]
    Database(DbErr),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn aborted(source: DbErr) -> Self {
        Self::TransactionAborted { source }
    }
}

/// Lock contention and pool exhaustion, as opposed to errors in the request.
fn is_contention(err: &DbErr) -> bool {
    if matches!(err, DbErr::ConnectionAcquire(_)) {
        return true;
    }
    let message = err.to_string();
    message.contains("database is locked") || message.contains("database table is locked")
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        if is_contention(&err) {
            Self::aborted(err)
        } else {
            Self::Database(err)
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_maps_to_aborted() {
        let busy = Error::from(DbErr::Custom("database is locked".to_string()));
        assert!(matches!(busy, Error::TransactionAborted { .. }));

        let locked = Error::from(DbErr::Custom("database table is locked: users".to_string()));
        assert!(matches!(locked, Error::TransactionAborted { .. }));

        let other = Error::from(DbErr::Custom("no such column".to_string()));
        assert!(matches!(other, Error::Database(_)));
    }
}
