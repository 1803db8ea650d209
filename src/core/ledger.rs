//! Ledger Store - per-user, per-currency balances with an append-only history.
//!
//! Every balance mutation is paired, inside one database transaction, with
//! exactly one row in `transactions` carrying the resulting balance. Replaying a
//! user's rows for a currency in creation order from zero therefore
//! reproduces every snapshot and the current balance ([`audit`] checks this).
//!
//! Balances are never read-modified-written from Rust. Credits use a single
//! `UPDATE ... SET balance = balance + n`, and debits a guarded
//! `UPDATE ... SET balance = balance - n WHERE balance >= n`, so two concurrent
//! debits can never both pass the sufficiency check.

use crate::{
    core::accounts,
    entities::{
        CurrencyBalance, Transaction, currency_balance,
        sea_orm_active_enums::{Currency, TransactionKind},
        transaction,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    Condition, QueryOrder, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, instrument};

/// Record a ledger transaction can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerLink {
    /// The site the mutation concerns
    Site(i64),
    /// The payment the mutation concerns
    Payment(i64),
}

/// One credit or debit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// User whose balance changes
    pub user_id: i64,
    /// Ledger to change
    pub currency: Currency,
    /// Strictly positive magnitude; the sign comes from credit/debit
    pub amount: i64,
    /// Reason recorded on the transaction
    pub kind: TransactionKind,
    /// Human-readable description
    pub description: String,
    /// Optional site or payment link
    pub link: Option<LedgerLink>,
}

impl Posting {
    /// Builds a posting without a link.
    pub fn new(
        user_id: i64,
        currency: Currency,
        amount: i64,
        kind: TransactionKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            currency,
            amount,
            kind,
            description: description.into(),
            link: None,
        }
    }

    /// Links the posting to a site or payment.
    #[must_use]
    pub const fn linked(mut self, link: LedgerLink) -> Self {
        self.link = Some(link);
        self
    }
}

/// Current state of one balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceSnapshot {
    /// Spendable balance
    pub balance: i64,
    /// Total ever credited
    pub lifetime: i64,
}

/// Result of replaying a user's history for one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Number of transactions replayed
    pub transactions: usize,
    /// Balance obtained by summing the history
    pub replayed_balance: i64,
    /// Balance stored on the balance row
    pub stored_balance: i64,
    /// Ids of transactions whose snapshot disagrees with the running sum
    pub mismatched: Vec<i64>,
}

impl LedgerAudit {
    /// True when the history reproduces every snapshot and the stored balance.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty() && self.replayed_balance == self.stored_balance
    }
}

fn scope(user_id: i64, currency: Currency) -> Condition {
    Condition::all()
        .add(currency_balance::Column::UserId.eq(user_id))
        .add(currency_balance::Column::Currency.eq(currency))
}

async fn find_balance<C>(
    db: &C,
    user_id: i64,
    currency: Currency,
) -> Result<Option<currency_balance::Model>>
where
    C: ConnectionTrait,
{
    CurrencyBalance::find()
        .filter(scope(user_id, currency))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Creates the zero balance row for `(user_id, currency)` unless it exists.
async fn ensure_balance_row<C>(db: &C, user_id: i64, currency: Currency) -> Result<()>
where
    C: ConnectionTrait,
{
    let row = currency_balance::ActiveModel {
        user_id: Set(user_id),
        currency: Set(currency),
        balance: Set(0),
        lifetime: Set(0),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };

    CurrencyBalance::insert(row)
        .on_conflict(
            OnConflict::columns([
                currency_balance::Column::UserId,
                currency_balance::Column::Currency,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

async fn append<C>(db: &C, posting: Posting, signed: i64, balance: i64) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    let (site_id, payment_id) = match posting.link {
        Some(LedgerLink::Site(id)) => (Some(id), None),
        Some(LedgerLink::Payment(id)) => (None, Some(id)),
        None => (None, None),
    };

    let row = transaction::ActiveModel {
        user_id: Set(posting.user_id),
        currency: Set(posting.currency),
        amount: Set(signed),
        balance: Set(balance),
        kind: Set(posting.kind),
        description: Set(posting.description),
        site_id: Set(site_id),
        payment_id: Set(payment_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(row.insert(db).await?)
}

fn validate(posting: &Posting) -> Result<()> {
    if posting.amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: posting.amount,
        });
    }
    Ok(())
}

/// Adds `posting.amount` to the balance and to the lifetime total.
///
/// Runs in its own transaction, or in a savepoint when `db` already is one.
///
/// # Errors
/// * [`Error::InvalidAmount`] when the amount is not positive
/// * [`Error::NotFound`] when the user does not exist
#[instrument(skip(db, posting), fields(user_id = posting.user_id, currency = %posting.currency, amount = posting.amount))]
pub async fn credit<C>(db: &C, posting: Posting) -> Result<transaction::Model>
where
    C: TransactionTrait,
{
    validate(&posting)?;

    let txn = db.begin().await?;
    accounts::get_user(&txn, posting.user_id).await?;
    ensure_balance_row(&txn, posting.user_id, posting.currency).await?;

    CurrencyBalance::update_many()
        .col_expr(
            currency_balance::Column::Balance,
            Expr::col(currency_balance::Column::Balance).add(posting.amount),
        )
        .col_expr(
            currency_balance::Column::Lifetime,
            Expr::col(currency_balance::Column::Lifetime).add(posting.amount),
        )
        .col_expr(currency_balance::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(scope(posting.user_id, posting.currency))
        .exec(&txn)
        .await?;

    let row = find_balance(&txn, posting.user_id, posting.currency)
        .await?
        .ok_or_else(|| Error::not_found("balance", posting.user_id))?;

    let amount = posting.amount;
    let recorded = append(&txn, posting, amount, row.balance).await?;
    txn.commit().await?;

    debug!(transaction_id = recorded.id, balance = row.balance, "Credited");
    Ok(recorded)
}

/// Removes `posting.amount` from the balance. `lifetime` is untouched.
///
/// # Errors
/// * [`Error::InvalidAmount`] when the amount is not positive
/// * [`Error::InsufficientBalance`] when the balance is smaller than the amount;
///   nothing is written in that case
#[instrument(skip(db, posting), fields(user_id = posting.user_id, currency = %posting.currency, amount = posting.amount))]
pub async fn debit<C>(db: &C, posting: Posting) -> Result<transaction::Model>
where
    C: TransactionTrait,
{
    validate(&posting)?;

    let txn = db.begin().await?;

    // Guarded compare-and-swap: only succeeds while the balance covers the amount
    let updated = CurrencyBalance::update_many()
        .col_expr(
            currency_balance::Column::Balance,
            Expr::col(currency_balance::Column::Balance).sub(posting.amount),
        )
        .col_expr(currency_balance::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(scope(posting.user_id, posting.currency))
        .filter(currency_balance::Column::Balance.gte(posting.amount))
        .exec(&txn)
        .await?;

    if updated.rows_affected == 0 {
        let available = find_balance(&txn, posting.user_id, posting.currency)
            .await?
            .map_or(0, |row| row.balance);
        return Err(Error::InsufficientBalance {
            currency: posting.currency,
            required: posting.amount,
            available,
        });
    }

    let row = find_balance(&txn, posting.user_id, posting.currency)
        .await?
        .ok_or_else(|| Error::not_found("balance", posting.user_id))?;

    let amount = posting.amount;
    let recorded = append(&txn, posting, -amount, row.balance).await?;
    txn.commit().await?;

    debug!(transaction_id = recorded.id, balance = row.balance, "Debited");
    Ok(recorded)
}

/// Returns the balance and lifetime total, or zeros when the user has never
/// been credited or debited in `currency`.
pub async fn get_balance<C>(db: &C, user_id: i64, currency: Currency) -> Result<BalanceSnapshot>
where
    C: ConnectionTrait,
{
    Ok(find_balance(db, user_id, currency)
        .await?
        .map_or_else(BalanceSnapshot::default, |row| BalanceSnapshot {
            balance: row.balance,
            lifetime: row.lifetime,
        }))
}

/// Lists a user's transactions for one currency in creation order.
pub async fn transactions<C>(
    db: &C,
    user_id: i64,
    currency: Currency,
) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .filter(transaction::Column::Currency.eq(currency))
        .order_by_asc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Replays the history of `(user_id, currency)` from zero and compares every
/// snapshot and the final sum with the stored balance.
pub async fn audit<C>(db: &C, user_id: i64, currency: Currency) -> Result<LedgerAudit>
where
    C: ConnectionTrait,
{
    let history = transactions(db, user_id, currency).await?;
    let stored_balance = get_balance(db, user_id, currency).await?.balance;

    let mut running = 0_i64;
    let mut mismatched = Vec::new();
    for row in &history {
        running += row.amount;
        if running != row.balance {
            mismatched.push(row.id);
        }
    }

    Ok(LedgerAudit {
        transactions: history.len(),
        replayed_balance: running,
        stored_balance,
        mismatched,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_amount_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        for amount in [0, -5] {
            let posting = Posting::new(1, Currency::Payment, amount, TransactionKind::Bonus, "x");
            assert!(matches!(
                credit(&db, posting.clone()).await,
                Err(Error::InvalidAmount { amount: a }) if a == amount
            ));
            assert!(matches!(
                debit(&db, posting).await,
                Err(Error::InvalidAmount { .. })
            ));
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_get_balance_defaults_to_zero() -> Result<()> {
        let db = setup_test_db().await?;
        let snapshot = get_balance(&db, 12345, Currency::Usage).await?;
        assert_eq!(snapshot, BalanceSnapshot::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_credit_unknown_user() -> Result<()> {
        let db = setup_test_db().await?;
        let result = credit(
            &db,
            Posting::new(404, Currency::Payment, 10, TransactionKind::Bonus, "bonus"),
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound { entity: "user", .. })));
        assert_eq!(
            get_balance(&db, 404, Currency::Payment).await?,
            BalanceSnapshot::default()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_credit_updates_balance_and_lifetime() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "credit@example.com", dec!(0)).await?;

        let first = credit(
            &db,
            Posting::new(user.id, Currency::Payment, 500, TransactionKind::Purchase, "Top up")
                .linked(LedgerLink::Payment(9)),
        )
        .await?;
        assert_eq!(first.amount, 500);
        assert_eq!(first.balance, 500);
        assert_eq!(first.kind, TransactionKind::Purchase);
        assert_eq!(first.payment_id, Some(9));
        assert_eq!(first.site_id, None);

        let second = credit(
            &db,
            Posting::new(user.id, Currency::Payment, 25, TransactionKind::Bonus, "Bonus"),
        )
        .await?;
        assert_eq!(second.balance, 525);

        let snapshot = get_balance(&db, user.id, Currency::Payment).await?;
        assert_eq!(snapshot.balance, 525);
        assert_eq!(snapshot.lifetime, 525);

        // The other currency is independent
        assert_eq!(
            get_balance(&db, user.id, Currency::Usage).await?,
            BalanceSnapshot::default()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_keeps_lifetime() -> Result<()> {
        let (db, user) = setup_with_balance(Currency::Usage, 100).await?;

        let spent = debit(
            &db,
            Posting::new(user.id, Currency::Usage, 40, TransactionKind::Usage, "Article")
                .linked(LedgerLink::Site(3)),
        )
        .await?;
        assert_eq!(spent.amount, -40);
        assert_eq!(spent.balance, 60);
        assert_eq!(spent.site_id, Some(3));

        let snapshot = get_balance(&db, user.id, Currency::Usage).await?;
        assert_eq!(snapshot.balance, 60);
        assert_eq!(snapshot.lifetime, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_insufficient_balance() -> Result<()> {
        let (db, user) = setup_with_balance(Currency::Payment, 100).await?;

        let result = debit(
            &db,
            Posting::new(user.id, Currency::Payment, 300, TransactionKind::Subscription, "Plan"),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientBalance {
                currency: Currency::Payment,
                required: 300,
                available: 100,
            })
        ));

        // Nothing was applied
        assert_eq!(get_balance(&db, user.id, Currency::Payment).await?.balance, 100);
        assert_eq!(transactions(&db, user.id, Currency::Payment).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_without_balance_row() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "empty@example.com", dec!(0)).await?;

        let result = debit(
            &db,
            Posting::new(user.id, Currency::Usage, 1, TransactionKind::Usage, "Article"),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientBalance { available: 0, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_exact_balance_reaches_zero() -> Result<()> {
        let (db, user) = setup_with_balance(Currency::Payment, 300).await?;
        let spent = debit(
            &db,
            Posting::new(user.id, Currency::Payment, 300, TransactionKind::Subscription, "Plan"),
        )
        .await?;
        assert_eq!(spent.balance, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_balance_conservation_over_mixed_sequence() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "mixed@example.com", dec!(0)).await?;

        let steps: [i64; 12] = [50, -20, 70, -100, -1, 30, 5, -35, 200, -199, 10, -500];
        let mut expected = 0_i64;
        for step in steps {
            let kind = if step > 0 {
                TransactionKind::Bonus
            } else {
                TransactionKind::Usage
            };
            let posting = Posting::new(user.id, Currency::Usage, step.abs(), kind, "step");
            let result = if step > 0 {
                credit(&db, posting).await
            } else {
                debit(&db, posting).await
            };

            match result {
                Ok(row) => {
                    expected += step;
                    assert_eq!(row.balance, expected);
                }
                Err(Error::InsufficientBalance { available, .. }) => {
                    assert_eq!(available, expected);
                    assert!(expected + step < 0);
                }
                Err(other) => return Err(other),
            }
            assert!(get_balance(&db, user.id, Currency::Usage).await?.balance >= 0);
        }

        let report = audit(&db, user.id, Currency::Usage).await?;
        assert!(report.is_consistent());
        assert_eq!(report.replayed_balance, expected);
        assert_eq!(report.stored_balance, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_audit_detects_tampering() -> Result<()> {
        let (db, user) = setup_with_balance(Currency::Payment, 100).await?;

        CurrencyBalance::update_many()
            .col_expr(currency_balance::Column::Balance, Expr::value(90_i64))
            .filter(currency_balance::Column::UserId.eq(user.id))
            .exec(&db)
            .await?;

        let report = audit(&db, user.id, Currency::Payment).await?;
        assert!(!report.is_consistent());
        assert_eq!(report.replayed_balance, 100);
        assert_eq!(report.stored_balance, 90);
        Ok(())
    }

    #[tokio::test]
    async fn test_credit_rolls_back_with_outer_transaction() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "rollback@example.com", dec!(0)).await?;

        let txn = db.begin().await?;
        credit(
            &txn,
            Posting::new(user.id, Currency::Payment, 10, TransactionKind::Bonus, "bonus"),
        )
        .await?;
        txn.rollback().await?;

        assert_eq!(
            get_balance(&db, user.id, Currency::Payment).await?,
            BalanceSnapshot::default()
        );
        assert!(transactions(&db, user.id, Currency::Payment).await?.is_empty());
        Ok(())
    }
}
