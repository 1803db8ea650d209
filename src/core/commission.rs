//! Commission Engine - referral rewards for successful payments.
//!
//! A commission is created at most once per payment (the `payment_id` column is
//! unique and [`on_payment_succeeded`] returns the stored row on a retry). The
//! referrer's rate is copied into `percentage` when the commission is created
//! and never read from the user again.

use crate::{
    core::{
        accounts,
        notification::{self, NewNotification},
    },
    entities::{
        Commission, User, commission, payment,
        sea_orm_active_enums::{CommissionStatus, NotificationKind},
        user,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use serde_json::json;
use tracing::{debug, info, instrument};

/// Decimal places commissions are rounded to.
pub const COMMISSION_PRECISION: u32 = 2;

impl CommissionStatus {
    /// PAID and CANCELLED accept no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

/// Totals a referrer has earned, grouped by payout state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferralStats {
    /// Users who signed up through this referrer
    pub referred_users: u64,
    /// Number of commissions ever created
    pub commissions: usize,
    /// Sum of PENDING commissions
    pub pending: Decimal,
    /// Sum of PAID commissions
    pub paid: Decimal,
    /// Sum of CANCELLED commissions
    pub cancelled: Decimal,
}

/// `payment_amount × percentage / 100`, rounded to cents half away from zero.
#[must_use]
pub fn commission_amount(payment_amount: Decimal, percentage: Decimal) -> Decimal {
    (payment_amount * percentage / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(COMMISSION_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

/// Fetches a commission or fails with [`Error::NotFound`].
pub async fn get_commission<C>(db: &C, commission_id: i64) -> Result<commission::Model>
where
    C: ConnectionTrait,
{
    Commission::find_by_id(commission_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("commission", commission_id))
}

/// Returns the commission recorded for a payment, if any.
pub async fn commission_for_payment<C>(
    db: &C,
    payment_id: i64,
) -> Result<Option<commission::Model>>
where
    C: ConnectionTrait,
{
    Commission::find()
        .filter(commission::Column::PaymentId.eq(payment_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Records the referral commission for a settled payment.
///
/// Returns the existing commission unchanged when one was already recorded for
/// `payment`, and `None` when the payer was not referred or the referrer's rate
/// is zero. The referrer is notified on creation.
#[instrument(skip(db, payment), fields(payment_id = payment.id, payer = payment.user_id))]
pub async fn on_payment_succeeded<C>(
    db: &C,
    payment: &payment::Model,
    subscription_id: Option<i64>,
) -> Result<Option<commission::Model>>
where
    C: TransactionTrait,
{
    let txn = db.begin().await?;

    if let Some(existing) = commission_for_payment(&txn, payment.id).await? {
        debug!(commission_id = existing.id, "Commission already recorded");
        return Ok(Some(existing));
    }

    let payer = accounts::get_user(&txn, payment.user_id).await?;
    let Some(referrer_id) = payer.referred_by_id else {
        return Ok(None);
    };
    let referrer = accounts::get_user(&txn, referrer_id).await?;
    if referrer.commission_rate.is_zero() {
        debug!(referrer_id, "Referrer has no commission rate");
        return Ok(None);
    }

    let percentage = referrer.commission_rate;
    let amount = commission_amount(payment.amount, percentage);

    let created = commission::ActiveModel {
        referrer_id: Set(referrer.id),
        referred_user_id: Set(payer.id),
        payment_id: Set(payment.id),
        subscription_id: Set(subscription_id),
        amount: Set(amount),
        percentage: Set(percentage),
        status: Set(CommissionStatus::Pending),
        created_at: Set(Utc::now()),
        paid_at: Set(None),
        cancelled_at: Set(None),
        cancel_reason: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    notification::notify(
        &txn,
        NewNotification::new(
            referrer.id,
            NotificationKind::Commission,
            "New referral commission",
            format!(
                "{} made a ${} payment. You earned ${amount} ({percentage}%).",
                payer.email, payment.amount
            ),
        )
        .with_link("/affiliate/commissions")
        .with_icon("dollar-sign")
        .with_metadata(json!({
            "commission_id": created.id,
            "payment_id": payment.id,
            "amount": amount.to_string(),
        })),
    )
    .await;

    txn.commit().await?;

    info!(
        commission_id = created.id,
        referrer_id = referrer.id,
        %amount,
        "Commission recorded"
    );
    Ok(Some(created))
}

async fn settle<C>(
    db: &C,
    commission_id: i64,
    status: CommissionStatus,
    reason: Option<String>,
) -> Result<commission::Model>
where
    C: TransactionTrait,
{
    let txn = db.begin().await?;
    let existing = get_commission(&txn, commission_id).await?;
    if existing.status.is_terminal() {
        return Err(Error::InvalidTransition {
            entity: "commission",
            from: existing.status.to_string(),
            to: status.to_string(),
        });
    }

    let now = Utc::now();
    let mut active_model: commission::ActiveModel = existing.into();
    active_model.status = Set(status);
    if status == CommissionStatus::Paid {
        active_model.paid_at = Set(Some(now));
    } else {
        active_model.cancelled_at = Set(Some(now));
        active_model.cancel_reason = Set(reason.clone());
    }
    let updated = active_model.update(&txn).await?;

    let message = match (status, reason) {
        (CommissionStatus::Paid, _) => format!("Your commission of ${} was paid out.", updated.amount),
        (_, Some(reason)) => format!(
            "Your commission of ${} was cancelled: {reason}",
            updated.amount
        ),
        (_, None) => format!("Your commission of ${} was cancelled.", updated.amount),
    };
    notification::notify(
        &txn,
        NewNotification::new(
            updated.referrer_id,
            NotificationKind::Commission,
            format!("Commission {status}"),
            message,
        )
        .with_link("/affiliate/commissions")
        .with_metadata(json!({ "commission_id": updated.id })),
    )
    .await;

    txn.commit().await?;
    info!(commission_id, %status, "Commission settled");
    Ok(updated)
}

/// PENDING → PAID. Sets `paid_at` and notifies the referrer.
pub async fn mark_paid<C>(db: &C, commission_id: i64) -> Result<commission::Model>
where
    C: TransactionTrait,
{
    settle(db, commission_id, CommissionStatus::Paid, None).await
}

/// PENDING → CANCELLED. Sets `cancelled_at` and the reason, notifies the
/// referrer. This is the hook refunds and chargebacks use.
pub async fn cancel<C>(
    db: &C,
    commission_id: i64,
    reason: Option<String>,
) -> Result<commission::Model>
where
    C: TransactionTrait,
{
    settle(db, commission_id, CommissionStatus::Cancelled, reason).await
}

/// Lists a referrer's commissions, newest first.
pub async fn commissions_for_referrer<C>(
    db: &C,
    referrer_id: i64,
) -> Result<Vec<commission::Model>>
where
    C: ConnectionTrait,
{
    Commission::find()
        .filter(commission::Column::ReferrerId.eq(referrer_id))
        .order_by_desc(commission::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Aggregates a referrer's network size and earnings.
pub async fn referral_stats<C>(db: &C, referrer_id: i64) -> Result<ReferralStats>
where
    C: ConnectionTrait,
{
    let referred_users = User::find()
        .filter(user::Column::ReferredById.eq(referrer_id))
        .count(db)
        .await?;

    let commissions = commissions_for_referrer(db, referrer_id).await?;
    let mut stats = ReferralStats {
        referred_users,
        commissions: commissions.len(),
        ..ReferralStats::default()
    };
    for row in commissions {
        match row.status {
            CommissionStatus::Pending => stats.pending += row.amount,
            CommissionStatus::Paid => stats.paid += row.amount,
            CommissionStatus::Cancelled => stats.cancelled += row.amount,
        }
    }
    Ok(stats)
}
