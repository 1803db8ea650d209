//! Admin Override Path - privileged mutations outside the payment flow.
//!
//! Admin changes bypass the payment-currency debit entirely but keep the same
//! guarantees as the orchestrator: one [`UnitOfWork`], the subscription state
//! machine for every status move, and a notification to the affected user.

use crate::{
    core::{
        ledger::{self, LedgerLink, Posting},
        notification::NewNotification,
        plan::{MONTHS_PER_TERM, PlanCatalog},
        subscription,
        unit::UnitOfWork,
    },
    entities::{
        sea_orm_active_enums::{Currency, NotificationKind, Plan, SubscriptionStatus, TransactionKind},
        subscription as subscription_entity, transaction,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseTransaction, TransactionTrait};
use serde_json::json;
use tracing::{info, instrument};

/// Requested admin edits. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminSubscriptionChange {
    /// New plan
    pub plan: Option<Plan>,
    /// Target status, reached through the regular state machine
    pub status: Option<SubscriptionStatus>,
    /// New end date (and next billing date)
    pub end_date: Option<DateTime<Utc>>,
    /// Automatic renewal flag
    pub auto_renew: Option<bool>,
    /// Grant the usage credits an upgrade adds
    pub award_credits: bool,
    /// Reason shown to the user
    pub reason: Option<String>,
}

/// What an admin change did.
#[derive(Debug, Clone)]
pub struct AdminChangeOutcome {
    /// The subscription after every edit
    pub subscription: subscription_entity::Model,
    /// Usage credits granted for an upgrade
    pub credits_awarded: i64,
    /// Human-readable list of the applied edits
    pub actions: Vec<String>,
}

/// Usage credits an upgrade from `old` to `new` is worth: the monthly
/// difference over a full term, and never negative.
pub fn upgrade_award(catalog: &PlanCatalog, old: Plan, new: Plan) -> Result<i64> {
    let old_terms = catalog.terms(old)?;
    let new_terms = catalog.terms(new)?;
    let differential = new_terms
        .included_credits
        .checked_sub(old_terms.included_credits)
        .and_then(|monthly| monthly.checked_mul(MONTHS_PER_TERM))
        .ok_or_else(|| Error::InvalidPlan {
            plan: format!("{new}: credit differential from {old} overflows"),
        })?;
    Ok(differential.max(0))
}

async fn move_to(
    txn: &DatabaseTransaction,
    catalog: &PlanCatalog,
    subscription_id: i64,
    target: SubscriptionStatus,
    reason: Option<String>,
) -> Result<subscription_entity::Model> {
    match target {
        SubscriptionStatus::Active => subscription::activate(txn, catalog, subscription_id).await,
        SubscriptionStatus::PastDue => subscription::mark_past_due(txn, subscription_id).await,
        SubscriptionStatus::Cancelled => subscription::cancel(txn, subscription_id, reason).await,
        SubscriptionStatus::Expired => subscription::expire(txn, subscription_id).await,
        SubscriptionStatus::Pending => {
            let current = subscription::get_subscription(txn, subscription_id).await?;
            Err(Error::InvalidTransition {
                entity: "subscription",
                from: current.status.to_string(),
                to: target.to_string(),
            })
        }
    }
}

/// Applies an admin edit to a subscription in one atomic unit.
///
/// Order: plan change (with the optional upgrade award), status move, end
/// date, auto-renew. The site owner is always notified, even when nothing
/// changed.
///
/// # Errors
/// Any failing step aborts the whole change: [`Error::NotFound`],
/// [`Error::InvalidPlan`], [`Error::InvalidTransition`],
/// [`Error::SubscriptionConflict`] or [`Error::TransactionAborted`].
#[instrument(skip(db, catalog, change))]
pub async fn admin_change_subscription<C>(
    db: &C,
    catalog: &PlanCatalog,
    subscription_id: i64,
    change: AdminSubscriptionChange,
) -> Result<AdminChangeOutcome>
where
    C: TransactionTrait,
{
    let mut unit = UnitOfWork::begin(db).await?;
    let mut current = subscription::get_subscription(unit.txn(), subscription_id).await?;
    let mut actions = Vec::new();
    let mut credits_awarded = 0;

    if let Some(plan) = change.plan.filter(|plan| *plan != current.plan) {
        let previous = current.plan;
        current = subscription::change_plan(unit.txn(), catalog, subscription_id, plan).await?;
        actions.push(format!("plan changed from {previous} to {plan}"));

        if change.award_credits {
            credits_awarded = upgrade_award(catalog, previous, plan)?;
            if credits_awarded > 0 {
                ledger::credit(
                    unit.txn(),
                    Posting::new(
                        current.user_id,
                        Currency::Usage,
                        credits_awarded,
                        TransactionKind::AdminAdjust,
                        format!("Upgrade from {previous} to {plan}"),
                    )
                    .linked(LedgerLink::Site(current.site_id)),
                )
                .await?;
                actions.push(format!("{credits_awarded} usage credits awarded"));
            }
        }
    }

    if let Some(status) = change.status.filter(|status| *status != current.status) {
        let previous = current.status;
        current = move_to(unit.txn(), catalog, subscription_id, status, change.reason.clone())
            .await?;
        actions.push(format!("status changed from {previous} to {status}"));
    }

    if let Some(end_date) = change.end_date {
        current = subscription::extend(unit.txn(), subscription_id, end_date).await?;
        actions.push(format!("end date set to {}", end_date.format("%Y-%m-%d")));
    }

    if let Some(auto_renew) = change.auto_renew.filter(|flag| *flag != current.auto_renew) {
        current = subscription::set_auto_renew(unit.txn(), subscription_id, auto_renew).await?;
        actions.push(format!(
            "auto-renew {}",
            if auto_renew { "enabled" } else { "disabled" }
        ));
    }

    let summary = if actions.is_empty() {
        "An administrator reviewed your subscription; nothing was changed.".to_string()
    } else {
        format!("An administrator updated your subscription: {}.", actions.join(", "))
    };
    let message = match &change.reason {
        Some(reason) => format!("{summary} Reason: {reason}"),
        None => summary,
    };
    unit.queue_notification(
        NewNotification::new(
            current.user_id,
            NotificationKind::Admin,
            "Subscription updated",
            message,
        )
        .with_link(format!("/sites/{}", current.site_id))
        .with_icon("shield")
        .with_metadata(json!({
            "subscription_id": current.id,
            "actions": actions,
            "credits_awarded": credits_awarded,
        })),
    );
    unit.commit().await?;

    info!(subscription_id, credits_awarded, changes = actions.len(), "Admin changed subscription");
    Ok(AdminChangeOutcome {
        subscription: current,
        credits_awarded,
        actions,
    })
}

/// Credits (`delta > 0`) or debits (`delta < 0`) a balance as ADMIN_ADJUST and
/// notifies the user.
///
/// # Errors
/// * [`Error::InvalidAmount`] when `delta` is zero
/// * [`Error::InsufficientBalance`] when a debit exceeds the balance
/// * [`Error::NotFound`] for an unknown user
#[instrument(skip(db))]
pub async fn admin_adjust_balance<C>(
    db: &C,
    user_id: i64,
    currency: Currency,
    delta: i64,
    reason: &str,
) -> Result<transaction::Model>
where
    C: TransactionTrait,
{
    if delta == 0 {
        return Err(Error::InvalidAmount { amount: delta });
    }

    let mut unit = UnitOfWork::begin(db).await?;
    crate::core::accounts::get_user(unit.txn(), user_id).await?;

    let posting = Posting::new(
        user_id,
        currency,
        delta.abs(),
        TransactionKind::AdminAdjust,
        format!("Admin adjustment: {reason}"),
    );
    let recorded = if delta > 0 {
        ledger::credit(unit.txn(), posting).await?
    } else {
        ledger::debit(unit.txn(), posting).await?
    };

    unit.queue_notification(
        NewNotification::new(
            user_id,
            NotificationKind::Admin,
            "Balance adjusted",
            format!(
                "An administrator adjusted your {currency} balance by {delta}. Reason: {reason}"
            ),
        )
        .with_link("/credits")
        .with_metadata(json!({ "transaction_id": recorded.id, "delta": delta })),
    );
    unit.commit().await?;

    info!(user_id, %currency, delta, balance = recorded.balance, "Admin adjusted balance");
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::{accounts, notification},
        test_utils::*,
    };
    use chrono::Duration;

    #[test]
    fn test_upgrade_award_is_never_negative() {
        let catalog = PlanCatalog::default();
        assert_eq!(upgrade_award(&catalog, Plan::Basic, Plan::Pro).unwrap(), 180);
        assert_eq!(upgrade_award(&catalog, Plan::Basic, Plan::Everything).unwrap(), 600);
        assert_eq!(upgrade_award(&catalog, Plan::Pro, Plan::Basic).unwrap(), 0);
        assert_eq!(upgrade_award(&catalog, Plan::Pro, Plan::Pro).unwrap(), 0);
    }

    #[test]
    fn test_upgrade_award_rejects_overflow() {
        let mut huge = PlanCatalog::default().terms(Plan::Everything).unwrap();
        huge.included_credits = i64::MAX;
        let catalog = PlanCatalog::default()
            .with_overrides(std::collections::BTreeMap::from([(Plan::Everything, huge)]));

        assert!(matches!(
            upgrade_award(&catalog, Plan::Basic, Plan::Everything),
            Err(Error::InvalidPlan { .. })
        ));
        assert_eq!(huge.annual_usage_credits(), i64::MAX);
    }

    #[tokio::test]
    async fn test_admin_upgrade_awards_credits() -> Result<()> {
        let (db, site, sub) = setup_with_active_subscription(Plan::Basic).await?;
        let catalog = PlanCatalog::default();

        let outcome = admin_change_subscription(
            &db,
            &catalog,
            sub.id,
            AdminSubscriptionChange {
                plan: Some(Plan::Pro),
                award_credits: true,
                ..Default::default()
            },
        )
        .await?;

        assert_eq!(outcome.credits_awarded, 180);
        assert_eq!(outcome.subscription.plan, Plan::Pro);
        assert_eq!(outcome.subscription.status, SubscriptionStatus::Active);

        let usage = ledger::transactions(&db, site.owner_id, Currency::Usage).await?;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].amount, 180);
        assert_eq!(usage[0].kind, TransactionKind::AdminAdjust);
        assert_eq!(ledger::get_balance(&db, site.owner_id, Currency::Usage).await?.balance, 180);

        let site = accounts::get_site(&db, site.id).await?;
        assert!(site.has_game_screenshots);
        assert!(!site.has_bonus_code_feed);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_downgrade_never_debits() -> Result<()> {
        let (db, site, sub) = setup_with_active_subscription(Plan::Pro).await?;
        let catalog = PlanCatalog::default();

        let outcome = admin_change_subscription(
            &db,
            &catalog,
            sub.id,
            AdminSubscriptionChange {
                plan: Some(Plan::Basic),
                award_credits: true,
                ..Default::default()
            },
        )
        .await?;

        assert_eq!(outcome.credits_awarded, 0);
        assert_eq!(outcome.subscription.plan, Plan::Basic);
        assert!(ledger::transactions(&db, site.owner_id, Currency::Usage).await?.is_empty());
        assert_eq!(ledger::get_balance(&db, site.owner_id, Currency::Usage).await?.balance, 0);
        assert!(!accounts::get_site(&db, site.id).await?.has_game_screenshots);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_upgrade_without_award() -> Result<()> {
        let (db, site, sub) = setup_with_active_subscription(Plan::Basic).await?;

        let outcome = admin_change_subscription(
            &db,
            &PlanCatalog::default(),
            sub.id,
            AdminSubscriptionChange {
                plan: Some(Plan::Everything),
                ..Default::default()
            },
        )
        .await?;

        assert_eq!(outcome.credits_awarded, 0);
        assert!(ledger::transactions(&db, site.owner_id, Currency::Usage).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_change_status_dates_and_notification() -> Result<()> {
        let (db, site, sub) = setup_with_active_subscription(Plan::Basic).await?;
        let new_end = sub.end_date.unwrap() + Duration::days(90);

        let outcome = admin_change_subscription(
            &db,
            &PlanCatalog::default(),
            sub.id,
            AdminSubscriptionChange {
                end_date: Some(new_end),
                auto_renew: Some(false),
                reason: Some("Goodwill extension".to_string()),
                ..Default::default()
            },
        )
        .await?;

        assert_eq!(outcome.subscription.end_date, Some(new_end));
        assert!(!outcome.subscription.auto_renew);
        assert_eq!(outcome.actions.len(), 2);

        let inbox = notification::notifications_for_user(&db, site.owner_id).await?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::Admin);
        assert!(inbox[0].message.contains("Goodwill extension"));

        let cancelled = admin_change_subscription(
            &db,
            &PlanCatalog::default(),
            sub.id,
            AdminSubscriptionChange {
                status: Some(SubscriptionStatus::Cancelled),
                reason: Some("Abuse".to_string()),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(cancelled.subscription.status, SubscriptionStatus::Cancelled);
        assert_eq!(cancelled.subscription.cancel_reason.as_deref(), Some("Abuse"));
        assert!(!accounts::get_site(&db, site.id).await?.is_active);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_change_is_atomic() -> Result<()> {
        let (db, site, sub) = setup_with_active_subscription(Plan::Basic).await?;
        subscription::cancel(&db, sub.id, None).await?;
        let catalog = PlanCatalog::default();

        // Plan change on a terminal subscription fails before anything is written
        let result = admin_change_subscription(
            &db,
            &catalog,
            sub.id,
            AdminSubscriptionChange {
                plan: Some(Plan::Pro),
                award_credits: true,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        // Award succeeds but the later status move fails: the award is rolled back
        let (db2, site2, active) = setup_with_active_subscription(Plan::Basic).await?;
        let result = admin_change_subscription(
            &db2,
            &catalog,
            active.id,
            AdminSubscriptionChange {
                plan: Some(Plan::Pro),
                status: Some(SubscriptionStatus::Pending),
                award_credits: true,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(ledger::get_balance(&db2, site2.owner_id, Currency::Usage).await?.balance, 0);
        assert_eq!(
            subscription::get_subscription(&db2, active.id).await?.plan,
            Plan::Basic
        );
        assert!(notification::notifications_for_user(&db, site.owner_id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_adjust_balance() -> Result<()> {
        let (db, user) = setup_with_balance(Currency::Payment, 100).await?;

        let credited = admin_adjust_balance(&db, user.id, Currency::Payment, 25, "Promo").await?;
        assert_eq!(credited.amount, 25);
        assert_eq!(credited.balance, 125);
        assert_eq!(credited.kind, TransactionKind::AdminAdjust);

        let debited = admin_adjust_balance(&db, user.id, Currency::Payment, -120, "Fix").await?;
        assert_eq!(debited.amount, -120);
        assert_eq!(debited.balance, 5);

        assert!(matches!(
            admin_adjust_balance(&db, user.id, Currency::Payment, -6, "Too much").await,
            Err(Error::InsufficientBalance { required: 6, available: 5, .. })
        ));
        assert!(matches!(
            admin_adjust_balance(&db, user.id, Currency::Payment, 0, "Nothing").await,
            Err(Error::InvalidAmount { amount: 0 })
        ));

        let inbox = notification::notifications_for_user(&db, user.id).await?;
        assert_eq!(inbox.len(), 2);
        assert!(ledger::audit(&db, user.id, Currency::Payment).await?.is_consistent());
        Ok(())
    }
}
