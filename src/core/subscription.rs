//! Subscription Manager - the per-site subscription state machine.
//!
//! ```text
//! PENDING ──activate──▶ ACTIVE ──cancel──▶ CANCELLED
//!    │                  │    ▲  └─expire──▶ EXPIRED
//!    └──cancel──▶       ▼    │activate
//!                     PAST_DUE ──cancel/expire──▶ CANCELLED / EXPIRED
//! ```
//!
//! CANCELLED and EXPIRED are terminal. Every transition also updates the
//! owning site: activation turns it on and derives its feature flags from the
//! plan catalog, cancellation and expiry turn it off unless another live
//! subscription of the site remains. Nothing here moves money;
//! crediting or debiting around a transition is the orchestrator's decision.

use crate::{
    core::{
        accounts,
        plan::{PlanCatalog, SiteFeatures},
    },
    entities::{
        Subscription, site,
        sea_orm_active_enums::{Plan, SubscriptionStatus},
        subscription,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Months, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument, warn};

impl SubscriptionStatus {
    /// True for states nothing can leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active | Self::Cancelled)
                | (Self::Active, Self::PastDue | Self::Cancelled | Self::Expired)
                | (Self::PastDue, Self::Active | Self::Cancelled | Self::Expired)
        )
    }

    /// States in which the site is live and entitled to its plan's features.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }
}

fn check_transition(from: SubscriptionStatus, to: SubscriptionStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            entity: "subscription",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn one_term_after(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(12))
        .unwrap_or_else(|| start + Duration::days(365))
}

/// Outcome of one lapse sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Subscriptions moved to PAST_DUE
    pub past_due: Vec<i64>,
    /// Subscriptions moved to EXPIRED
    pub expired: Vec<i64>,
    /// Subscriptions the sweep could not transition
    pub failed: Vec<i64>,
}

/// Fetches a subscription or fails with [`Error::NotFound`].
pub async fn get_subscription<C>(db: &C, subscription_id: i64) -> Result<subscription::Model>
where
    C: ConnectionTrait,
{
    Subscription::find_by_id(subscription_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("subscription", subscription_id))
}

/// Returns the ACTIVE subscription of a site, if any.
pub async fn active_subscription_for_site<C>(
    db: &C,
    site_id: i64,
) -> Result<Option<subscription::Model>>
where
    C: ConnectionTrait,
{
    Subscription::find()
        .filter(subscription::Column::SiteId.eq(site_id))
        .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists every subscription a site ever had, newest first.
pub async fn subscriptions_for_site<C>(db: &C, site_id: i64) -> Result<Vec<subscription::Model>>
where
    C: ConnectionTrait,
{
    Subscription::find()
        .filter(subscription::Column::SiteId.eq(site_id))
        .order_by_desc(subscription::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn ensure_no_other_active<C>(db: &C, site_id: i64, except: Option<i64>) -> Result<()>
where
    C: ConnectionTrait,
{
    match active_subscription_for_site(db, site_id).await? {
        Some(active) if Some(active.id) != except => {
            Err(Error::SubscriptionConflict { site_id })
        }
        _ => Ok(()),
    }
}

/// Another ACTIVE or PAST_DUE subscription of the site, ACTIVE first.
async fn live_subscription_for_site<C>(
    db: &C,
    site_id: i64,
    except: i64,
) -> Result<Option<subscription::Model>>
where
    C: ConnectionTrait,
{
    let mut live = Subscription::find()
        .filter(subscription::Column::SiteId.eq(site_id))
        .filter(subscription::Column::Id.ne(except))
        .filter(
            subscription::Column::Status
                .is_in([SubscriptionStatus::Active, SubscriptionStatus::PastDue]),
        )
        .order_by_desc(subscription::Column::Id)
        .all(db)
        .await?;
    let active = live
        .iter()
        .position(|sub| sub.status == SubscriptionStatus::Active)
        .unwrap_or(0);
    Ok((!live.is_empty()).then(|| live.swap_remove(active)))
}

async fn update_site<C>(
    db: &C,
    site_id: i64,
    is_active: Option<bool>,
    features: Option<SiteFeatures>,
) -> Result<site::Model>
where
    C: ConnectionTrait,
{
    let site = accounts::get_site(db, site_id).await?;
    let mut active_model: site::ActiveModel = site.into();
    if let Some(is_active) = is_active {
        active_model.is_active = Set(is_active);
    }
    if let Some(features) = features {
        active_model.has_game_screenshots = Set(features.game_screenshots);
        active_model.has_bonus_code_feed = Set(features.bonus_code_feed);
    }
    Ok(active_model.update(db).await?)
}

/// Creates a PENDING subscription with prices snapshotted from the catalog.
///
/// # Errors
/// * [`Error::SubscriptionConflict`] when the site already has an ACTIVE one
/// * [`Error::InvalidPlan`] when the catalog has no terms for `plan`
/// * [`Error::NotFound`] when the site does not exist
#[instrument(skip(db, catalog))]
pub async fn create_subscription<C>(
    db: &C,
    catalog: &PlanCatalog,
    site_id: i64,
    plan: Plan,
    auto_renew: bool,
) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    let terms = catalog.terms(plan)?;

    let txn = db.begin().await?;
    let site = accounts::get_site(&txn, site_id).await?;
    ensure_no_other_active(&txn, site_id, None).await?;

    let now = Utc::now();
    let model = subscription::ActiveModel {
        site_id: Set(site_id),
        user_id: Set(site.owner_id),
        plan: Set(plan),
        status: Set(SubscriptionStatus::Pending),
        amount: Set(terms.annual_price),
        monthly_rate: Set(terms.monthly_rate),
        start_date: Set(None),
        end_date: Set(None),
        next_billing_date: Set(None),
        cancelled_at: Set(None),
        cancel_reason: Set(None),
        auto_renew: Set(auto_renew),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(model)
}

/// Moves a PENDING or PAST_DUE subscription to ACTIVE.
///
/// On first activation the annual term starts now: `end_date` is one year
/// later and `next_billing_date` equals `end_date`. The site is switched on and
/// its feature flags are derived from the plan.
#[instrument(skip(db, catalog))]
pub async fn activate<C>(
    db: &C,
    catalog: &PlanCatalog,
    subscription_id: i64,
) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    let txn = db.begin().await?;
    let existing = get_subscription(&txn, subscription_id).await?;
    check_transition(existing.status, SubscriptionStatus::Active)?;
    ensure_no_other_active(&txn, existing.site_id, Some(existing.id)).await?;
    let terms = catalog.terms(existing.plan)?;

    let now = Utc::now();
    let site_id = existing.site_id;
    let first_activation = existing.start_date.is_none();

    let mut active_model: subscription::ActiveModel = existing.into();
    active_model.status = Set(SubscriptionStatus::Active);
    if first_activation {
        let end = one_term_after(now);
        active_model.start_date = Set(Some(now));
        active_model.end_date = Set(Some(end));
        active_model.next_billing_date = Set(Some(end));
    }
    active_model.updated_at = Set(now);
    let updated = active_model.update(&txn).await?;

    update_site(&txn, site_id, Some(true), Some(terms.features())).await?;
    txn.commit().await?;

    info!(subscription_id, site_id, plan = %updated.plan, "Subscription activated");
    Ok(updated)
}

/// Switches the plan and re-snapshots its prices. Site entitlements follow
/// immediately while the subscription is live.
///
/// # Errors
/// * [`Error::InvalidTransition`] when the subscription is terminal
/// * [`Error::InvalidPlan`] when the catalog has no terms for `plan`
#[instrument(skip(db, catalog))]
pub async fn change_plan<C>(
    db: &C,
    catalog: &PlanCatalog,
    subscription_id: i64,
    plan: Plan,
) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    let terms = catalog.terms(plan)?;

    let txn = db.begin().await?;
    let existing = get_subscription(&txn, subscription_id).await?;
    if existing.status.is_terminal() {
        return Err(Error::InvalidTransition {
            entity: "subscription",
            from: existing.status.to_string(),
            to: format!("plan {plan}"),
        });
    }

    let site_id = existing.site_id;
    let live = existing.status.is_live();
    let previous = existing.plan;

    let mut active_model: subscription::ActiveModel = existing.into();
    active_model.plan = Set(plan);
    active_model.amount = Set(terms.annual_price);
    active_model.monthly_rate = Set(terms.monthly_rate);
    active_model.updated_at = Set(Utc::now());
    let updated = active_model.update(&txn).await?;

    if live {
        update_site(&txn, site_id, None, Some(terms.features())).await?;
    }
    txn.commit().await?;

    info!(subscription_id, %previous, %plan, "Subscription plan changed");
    Ok(updated)
}

async fn close<C>(
    db: &C,
    subscription_id: i64,
    status: SubscriptionStatus,
    reason: Option<String>,
) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    let txn = db.begin().await?;
    let existing = get_subscription(&txn, subscription_id).await?;
    check_transition(existing.status, status)?;

    let site_id = existing.site_id;
    let was_live = existing.status.is_live();
    let now = Utc::now();

    let mut active_model: subscription::ActiveModel = existing.into();
    active_model.status = Set(status);
    active_model.cancelled_at = Set(Some(now));
    active_model.cancel_reason = Set(reason);
    active_model.updated_at = Set(now);
    let updated = active_model.update(&txn).await?;

    if was_live {
        match live_subscription_for_site(&txn, site_id, subscription_id).await? {
            // The remaining subscription set the site's flags when it went live
            Some(other) => {
                debug!(subscription_id, site_id, kept_by = other.id, "Site stays live");
            }
            None => {
                update_site(&txn, site_id, Some(false), None).await?;
            }
        }
    }
    txn.commit().await?;

    info!(subscription_id, site_id, %status, "Subscription closed");
    Ok(updated)
}

/// User-initiated end: status CANCELLED, `cancelled_at` set, site switched off.
pub async fn cancel<C>(
    db: &C,
    subscription_id: i64,
    reason: Option<String>,
) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    close(db, subscription_id, SubscriptionStatus::Cancelled, reason).await
}

/// Lapse without renewal: identical to [`cancel`] but status EXPIRED.
pub async fn expire<C>(db: &C, subscription_id: i64) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    close(db, subscription_id, SubscriptionStatus::Expired, None).await
}

/// ACTIVE → PAST_DUE while a renewal payment is outstanding.
pub async fn mark_past_due<C>(db: &C, subscription_id: i64) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    let txn = db.begin().await?;
    let existing = get_subscription(&txn, subscription_id).await?;
    check_transition(existing.status, SubscriptionStatus::PastDue)?;

    let mut active_model: subscription::ActiveModel = existing.into();
    active_model.status = Set(SubscriptionStatus::PastDue);
    active_model.updated_at = Set(Utc::now());
    let updated = active_model.update(&txn).await?;
    txn.commit().await?;

    info!(subscription_id, "Subscription past due");
    Ok(updated)
}

/// Moves `end_date` and `next_billing_date`. The status is left alone.
pub async fn extend<C>(
    db: &C,
    subscription_id: i64,
    new_end_date: DateTime<Utc>,
) -> Result<subscription::Model>
where
    C: TransactionTrait,
{
    let txn = db.begin().await?;
    let existing = get_subscription(&txn, subscription_id).await?;
    if existing.status.is_terminal() {
        return Err(Error::InvalidTransition {
            entity: "subscription",
            from: existing.status.to_string(),
            to: format!("end date {new_end_date}"),
        });
    }

    let mut active_model: subscription::ActiveModel = existing.into();
    active_model.end_date = Set(Some(new_end_date));
    active_model.next_billing_date = Set(Some(new_end_date));
    active_model.updated_at = Set(Utc::now());
    let updated = active_model.update(&txn).await?;
    txn.commit().await?;

    info!(subscription_id, %new_end_date, "Subscription extended");
    Ok(updated)
}

/// Turns automatic renewal on or off.
pub async fn set_auto_renew<C>(
    db: &C,
    subscription_id: i64,
    auto_renew: bool,
) -> Result<subscription::Model>
where
    C: ConnectionTrait,
{
    let existing = get_subscription(db, subscription_id).await?;
    let mut active_model: subscription::ActiveModel = existing.into();
    active_model.auto_renew = Set(auto_renew);
    active_model.updated_at = Set(Utc::now());
    Ok(active_model.update(db).await?)
}

/// Deletes a subscription that is not ACTIVE.
///
/// # Errors
/// [`Error::SubscriptionConflict`] when the subscription is ACTIVE.
pub async fn delete_subscription<C>(db: &C, subscription_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = get_subscription(db, subscription_id).await?;
    if existing.status == SubscriptionStatus::Active {
        return Err(Error::SubscriptionConflict {
            site_id: existing.site_id,
        });
    }
    existing.delete(db).await?;
    info!(subscription_id, "Subscription deleted");
    Ok(())
}

/// Applies lapse rules as of `now`; meant to be driven by an external cron.
///
/// * ACTIVE past its `end_date` → PAST_DUE when it auto-renews, else EXPIRED
/// * PAST_DUE more than `grace_days` past its `end_date` → EXPIRED
///
/// A subscription is transitioned at most once per pass, so no id appears in
/// more than one list of the report. A subscription that fails to transition
/// is logged and reported in [`SweepReport::failed`]; the sweep carries on
/// with the rest.
#[instrument(skip(db))]
pub async fn sweep_lapsed_subscriptions<C>(
    db: &C,
    now: DateTime<Utc>,
    grace_days: i64,
) -> Result<SweepReport>
where
    C: TransactionTrait + ConnectionTrait,
{
    let mut report = SweepReport::default();

    let lapsed = Subscription::find()
        .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
        .filter(subscription::Column::EndDate.lte(now))
        .order_by_asc(subscription::Column::Id)
        .all(db)
        .await?;

    for sub in lapsed {
        let outcome = if sub.auto_renew {
            mark_past_due(db, sub.id).await
        } else {
            expire(db, sub.id).await
        };
        match outcome {
            Ok(updated) if updated.status == SubscriptionStatus::PastDue => {
                report.past_due.push(sub.id);
            }
            Ok(_) => report.expired.push(sub.id),
            Err(e) => {
                warn!(subscription_id = sub.id, "Sweep could not transition subscription: {e}");
                report.failed.push(sub.id);
            }
        }
    }

    let grace_cutoff = now - Duration::days(grace_days);
    let overdue = Subscription::find()
        .filter(subscription::Column::Status.eq(SubscriptionStatus::PastDue))
        .filter(subscription::Column::EndDate.lte(grace_cutoff))
        .order_by_asc(subscription::Column::Id)
        .all(db)
        .await?;

    for sub in overdue {
        // Moved to PAST_DUE earlier in this pass; expiring waits for the next one
        if report.past_due.contains(&sub.id) {
            continue;
        }
        match expire(db, sub.id).await {
            Ok(_) => report.expired.push(sub.id),
            Err(e) => {
                warn!(subscription_id = sub.id, "Sweep could not expire subscription: {e}");
                report.failed.push(sub.id);
            }
        }
    }

    info!(
        past_due = report.past_due.len(),
        expired = report.expired.len(),
        failed = report.failed.len(),
        "Subscription sweep finished"
    );
    Ok(report)
}
