//! Atomic unit of work shared by every orchestrated operation.
//!
//! A [`UnitOfWork`] owns one database transaction. Steps borrow it through
//! [`UnitOfWork::txn`]; trailing effects (commission runs and notifications) are
//! queued and only executed by [`UnitOfWork::commit`], each inside its own
//! savepoint so a failing effect is rolled back alone and logged. Dropping a
//! unit without committing it (e.g. after a `?` on a failed step) rolls back
//! every write made through it.

use crate::{
    core::{
        commission,
        notification::{self, NewNotification},
    },
    entities::{commission as commission_entity, payment},
    errors::{Error, Result},
};
use sea_orm::{DatabaseTransaction, TransactionTrait};
use tracing::{debug, warn};

#[derive(Debug)]
struct QueuedCommission {
    payment: payment::Model,
    subscription_id: Option<i64>,
}

/// What the trailing effects produced.
#[derive(Debug, Default)]
pub struct Committed {
    /// Commissions created or found, in queue order
    pub commissions: Vec<commission_entity::Model>,
    /// Notifications that were recorded
    pub notifications: usize,
}

/// One all-or-nothing business operation.
#[derive(Debug)]
pub struct UnitOfWork {
    txn: DatabaseTransaction,
    commissions: Vec<QueuedCommission>,
    notifications: Vec<NewNotification>,
}

impl UnitOfWork {
    /// Opens the unit. When `db` is already a transaction the unit becomes a
    /// savepoint inside it.
    pub async fn begin<C>(db: &C) -> Result<Self>
    where
        C: TransactionTrait,
    {
        Ok(Self {
            txn: db.begin().await?,
            commissions: Vec::new(),
            notifications: Vec::new(),
        })
    }

    /// The transaction every step must run on.
    #[must_use]
    pub const fn txn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Queues the commission run for a payment.
    pub fn queue_commission(&mut self, payment: payment::Model, subscription_id: Option<i64>) {
        self.commissions.push(QueuedCommission {
            payment,
            subscription_id,
        });
    }

    /// Queues a notification.
    pub fn queue_notification(&mut self, notification: NewNotification) {
        self.notifications.push(notification);
    }

    /// Runs the queued effects best-effort, then commits.
    ///
    /// # Errors
    /// [`Error::TransactionAborted`] when the final commit fails; nothing from
    /// the unit is persisted in that case.
    pub async fn commit(self) -> Result<Committed> {
        let Self {
            txn,
            commissions,
            notifications,
        } = self;
        let mut committed = Committed::default();

        for queued in commissions {
            let payment_id = queued.payment.id;
            match commission::on_payment_succeeded(&txn, &queued.payment, queued.subscription_id)
                .await
            {
                Ok(Some(created)) => committed.commissions.push(created),
                Ok(None) => {}
                Err(e) => warn!(payment_id, "Commission run failed, payment kept: {e}"),
            }
        }

        for new in notifications {
            if notification::notify(&txn, new).await.is_some() {
                committed.notifications += 1;
            }
        }

        txn.commit().await.map_err(Error::aborted)?;
        debug!(
            commissions = committed.commissions.len(),
            notifications = committed.notifications,
            "Unit of work committed"
        );
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::ledger::{self, Posting},
        entities::sea_orm_active_enums::{Currency, NotificationKind, TransactionKind},
        test_utils::*,
    };
    use rust_decimal_macros::dec;
    use sea_orm::ConnectionTrait;

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "drop@example.com", dec!(0)).await?;

        {
            let unit = UnitOfWork::begin(&db).await?;
            ledger::credit(
                unit.txn(),
                Posting::new(user.id, Currency::Usage, 50, TransactionKind::Bonus, "bonus"),
            )
            .await?;
        }

        assert_eq!(ledger::get_balance(&db, user.id, Currency::Usage).await?.balance, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_runs_queued_effects() -> Result<()> {
        let (db, referrer, payer) = setup_referral(dec!(20)).await?;
        let payment = create_test_payment(&db, payer.id, dec!(50)).await?;

        let mut unit = UnitOfWork::begin(&db).await?;
        unit.queue_commission(payment.clone(), None);
        unit.queue_notification(NewNotification::new(
            payer.id,
            NotificationKind::Payment,
            "Paid",
            "Thanks",
        ));
        let committed = unit.commit().await?;

        assert_eq!(committed.commissions.len(), 1);
        assert_eq!(committed.commissions[0].amount, dec!(10));
        assert_eq!(committed.notifications, 1);
        assert!(commission::commission_for_payment(&db, payment.id).await?.is_some());
        assert_eq!(
            notification::notifications_for_user(&db, referrer.id).await?.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_effects_do_not_block_commit() -> Result<()> {
        let (db, _referrer, payer) = setup_referral(dec!(20)).await?;
        let payment = create_test_payment(&db, payer.id, dec!(50)).await?;
        db.execute_unprepared("DROP TABLE notifications").await?;
        db.execute_unprepared("DROP TABLE commissions").await?;

        let mut unit = UnitOfWork::begin(&db).await?;
        ledger::credit(
            unit.txn(),
            Posting::new(payer.id, Currency::Payment, 5, TransactionKind::Bonus, "bonus"),
        )
        .await?;
        unit.queue_commission(payment, None);
        unit.queue_notification(NewNotification::new(
            payer.id,
            NotificationKind::Credits,
            "Bonus",
            "5 credits",
        ));
        let committed = unit.commit().await?;

        assert!(committed.commissions.is_empty());
        assert_eq!(committed.notifications, 0);
        assert_eq!(ledger::get_balance(&db, payer.id, Currency::Payment).await?.balance, 5);
        Ok(())
    }
}
