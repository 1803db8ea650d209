//! Payment Orchestrator - all-or-nothing business operations.
//!
//! Each public operation opens one [`UnitOfWork`], runs its money-moving steps
//! on the unit's transaction and queues the commission run and the payer's
//! notification as trailing effects. A step error returns early through `?`,
//! which drops the unit and rolls back every earlier step: no stray payment,
//! transaction or subscription is ever left behind.

use crate::{
    core::{
        accounts,
        ledger::{self, LedgerLink, Posting},
        notification::NewNotification,
        plan::PlanCatalog,
        subscription,
        unit::UnitOfWork,
    },
    entities::{
        Payment, commission, payment,
        sea_orm_active_enums::{
            Currency, NotificationKind, PaymentMethod, PaymentStatus, PaymentType,
            TransactionKind,
        },
        subscription as subscription_entity,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde_json::json;
use tracing::{info, instrument};

/// Currency code stored on every payment.
pub const PAYMENT_CURRENCY_CODE: &str = "USD";

/// Everything needed to record a settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDraft {
    /// Paying user
    pub user_id: i64,
    /// Site the payment is for
    pub site_id: Option<i64>,
    /// Face value in dollars
    pub amount: Decimal,
    /// What was bought
    pub payment_type: PaymentType,
    /// How it was funded
    pub method: PaymentMethod,
    /// Provider reference of an external capture
    pub external_ref: Option<String>,
}

/// Summary of a subscription bought with payment-currency credits.
#[derive(Debug, Clone)]
pub struct SubscriptionRedemption {
    /// The settled payment
    pub payment: payment::Model,
    /// The new ACTIVE subscription
    pub subscription: subscription_entity::Model,
    /// Payment-currency credits debited
    pub credits_used: i64,
    /// Usage-currency credits granted for the term
    pub usage_credits_awarded: i64,
    /// Payment-currency balance after the debit
    pub payment_balance: i64,
    /// Referral commission, when the payer was referred
    pub commission: Option<commission::Model>,
}

/// Summary of a usage-credit top-up paid with payment-currency credits.
#[derive(Debug, Clone)]
pub struct CreditPackRedemption {
    /// The settled payment
    pub payment: payment::Model,
    /// Payment-currency credits debited
    pub credits_used: i64,
    /// Usage-currency credits added
    pub usage_credits_awarded: i64,
    /// Payment-currency balance after the debit
    pub payment_balance: i64,
    /// Usage-currency balance after the credit
    pub usage_balance: i64,
    /// Referral commission, when the payer was referred
    pub commission: Option<commission::Model>,
}

/// A trusted "payment succeeded" event from card, PayPal or crypto capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalPayment {
    /// Paying user
    pub user_id: i64,
    /// Site the payment is for
    pub site_id: Option<i64>,
    /// Captured amount in dollars
    pub amount: Decimal,
    /// What was bought
    pub payment_type: PaymentType,
    /// Capture rail
    pub method: PaymentMethod,
    /// Provider reference; a second event with the same reference is a retry
    pub external_ref: String,
    /// Payment-currency credits to grant for the capture
    pub payment_credits: Option<i64>,
    /// Subscription the payment renews or buys, for commission attribution
    pub subscription_id: Option<i64>,
}

/// Outcome of [`record_external_payment`].
#[derive(Debug, Clone)]
pub struct ExternalPaymentReceipt {
    /// The stored payment
    pub payment: payment::Model,
    /// Ledger credit granted for the capture
    pub credited: Option<ledger::BalanceSnapshot>,
    /// Referral commission for the payment
    pub commission: Option<commission::Model>,
    /// True when the event had already been recorded
    pub duplicate: bool,
}

/// Inserts a SUCCEEDED payment. Failed attempts are never persisted.
pub async fn record_payment<C>(db: &C, draft: PaymentDraft) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    let model = payment::ActiveModel {
        user_id: Set(draft.user_id),
        site_id: Set(draft.site_id),
        amount: Set(draft.amount),
        currency: Set(PAYMENT_CURRENCY_CODE.to_string()),
        status: Set(PaymentStatus::Succeeded),
        payment_type: Set(draft.payment_type),
        method: Set(draft.method),
        external_ref: Set(draft.external_ref),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

/// Looks up a payment by its provider reference.
pub async fn payment_by_external_ref<C>(db: &C, external_ref: &str) -> Result<Option<payment::Model>>
where
    C: ConnectionTrait,
{
    Payment::find()
        .filter(payment::Column::ExternalRef.eq(external_ref))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Buys a year of `plan_id` for `site_id` with payment-currency credits.
///
/// Steps, all in one unit: ownership and conflict check, debit of
/// `ceil(annual_price)` payment credits, SUBSCRIPTION payment, subscription
/// created and activated with auto-renew, usage credits for the term, then
/// the commission run and the payer's notification.
///
/// # Errors
/// * [`Error::InvalidPlan`] for an unknown plan id
/// * [`Error::NotSiteOwner`] / [`Error::NotFound`] for a foreign or missing site
/// * [`Error::SubscriptionConflict`] when the site already has an ACTIVE plan
/// * [`Error::InsufficientBalance`] when the payment balance is short
/// * [`Error::TransactionAborted`] when the final commit fails
#[instrument(skip(db, catalog))]
pub async fn redeem_credits_for_subscription<C>(
    db: &C,
    catalog: &PlanCatalog,
    user_id: i64,
    site_id: i64,
    plan_id: &str,
) -> Result<SubscriptionRedemption>
where
    C: TransactionTrait,
{
    let (plan, terms) = catalog.resolve(plan_id)?;
    let mut unit = UnitOfWork::begin(db).await?;

    let site = accounts::get_owned_site(unit.txn(), user_id, site_id).await?;
    if subscription::active_subscription_for_site(unit.txn(), site_id)
        .await?
        .is_some()
    {
        return Err(Error::SubscriptionConflict { site_id });
    }

    let credits_used = terms.required_payment_credits();
    let debited = ledger::debit(
        unit.txn(),
        Posting::new(
            user_id,
            Currency::Payment,
            credits_used,
            TransactionKind::Subscription,
            format!("{plan} plan subscription for {}", site.name),
        )
        .linked(LedgerLink::Site(site_id)),
    )
    .await?;

    let payment = record_payment(
        unit.txn(),
        PaymentDraft {
            user_id,
            site_id: Some(site_id),
            amount: terms.annual_price,
            payment_type: PaymentType::Subscription,
            method: PaymentMethod::Credits,
            external_ref: None,
        },
    )
    .await?;

    let pending =
        subscription::create_subscription(unit.txn(), catalog, site_id, plan, true).await?;
    let active = subscription::activate(unit.txn(), catalog, pending.id).await?;

    let usage_credits_awarded = terms.annual_usage_credits();
    if usage_credits_awarded > 0 {
        ledger::credit(
            unit.txn(),
            Posting::new(
                user_id,
                Currency::Usage,
                usage_credits_awarded,
                TransactionKind::Subscription,
                format!(
                    "{plan} plan: {} credits/month for 12 months",
                    terms.included_credits
                ),
            )
            .linked(LedgerLink::Site(site_id)),
        )
        .await?;
    }

    unit.queue_commission(payment.clone(), Some(active.id));
    unit.queue_notification(
        NewNotification::new(
            user_id,
            NotificationKind::Subscription,
            "Subscription activated",
            format!(
                "{} is now on the {plan} plan. {usage_credits_awarded} usage credits were added.",
                site.name
            ),
        )
        .with_link(format!("/sites/{site_id}"))
        .with_icon("check-circle")
        .with_metadata(json!({
            "payment_id": payment.id,
            "subscription_id": active.id,
            "credits_used": credits_used,
        })),
    );

    let committed = unit.commit().await?;

    info!(
        user_id,
        site_id,
        %plan,
        credits_used,
        payment_balance = debited.balance,
        "Subscription redeemed with credits"
    );
    Ok(SubscriptionRedemption {
        payment,
        subscription: active,
        credits_used,
        usage_credits_awarded,
        payment_balance: debited.balance,
        commission: committed.commissions.into_iter().next(),
    })
}

/// Converts `pay_amount` payment credits into `usage_amount` usage credits.
///
/// # Errors
/// * [`Error::InvalidAmount`] when either amount is not positive
/// * [`Error::NotFound`] for an unknown user
/// * [`Error::InsufficientBalance`] when the payment balance is short
/// * [`Error::TransactionAborted`] when the final commit fails
#[instrument(skip(db))]
pub async fn redeem_credits_for_credit_pack<C>(
    db: &C,
    user_id: i64,
    pay_amount: i64,
    usage_amount: i64,
) -> Result<CreditPackRedemption>
where
    C: TransactionTrait,
{
    for amount in [pay_amount, usage_amount] {
        if amount <= 0 {
            return Err(Error::InvalidAmount { amount });
        }
    }

    let mut unit = UnitOfWork::begin(db).await?;
    accounts::get_user(unit.txn(), user_id).await?;

    let debited = ledger::debit(
        unit.txn(),
        Posting::new(
            user_id,
            Currency::Payment,
            pay_amount,
            TransactionKind::Purchase,
            format!("Credit pack: {usage_amount} usage credits"),
        ),
    )
    .await?;

    let payment = record_payment(
        unit.txn(),
        PaymentDraft {
            user_id,
            site_id: None,
            amount: Decimal::from(pay_amount),
            payment_type: PaymentType::CreditPurchase,
            method: PaymentMethod::Credits,
            external_ref: None,
        },
    )
    .await?;

    let credited = ledger::credit(
        unit.txn(),
        Posting::new(
            user_id,
            Currency::Usage,
            usage_amount,
            TransactionKind::Purchase,
            format!("Credit pack bought for {pay_amount} payment credits"),
        )
        .linked(LedgerLink::Payment(payment.id)),
    )
    .await?;

    unit.queue_commission(payment.clone(), None);
    unit.queue_notification(
        NewNotification::new(
            user_id,
            NotificationKind::Credits,
            "Credits added",
            format!("{usage_amount} usage credits were added to your account."),
        )
        .with_link("/credits")
        .with_icon("coins")
        .with_metadata(json!({
            "payment_id": payment.id,
            "usage_credits": usage_amount,
        })),
    );

    let committed = unit.commit().await?;

    info!(user_id, pay_amount, usage_amount, "Credit pack redeemed");
    Ok(CreditPackRedemption {
        payment,
        credits_used: pay_amount,
        usage_credits_awarded: usage_amount,
        payment_balance: debited.balance,
        usage_balance: credited.balance,
        commission: committed.commissions.into_iter().next(),
    })
}

/// Records an externally captured payment and its trailing effects.
///
/// Re-delivered events (same `external_ref`) return the stored payment and its
/// commission with `duplicate = true` and change nothing.
///
/// # Errors
/// * [`Error::NotFound`] / [`Error::NotSiteOwner`] for unknown users or sites
/// * [`Error::InvalidAmount`] when `payment_credits` is not positive
/// * [`Error::TransactionAborted`] when the final commit fails
#[instrument(skip(db, event), fields(user_id = event.user_id, external_ref = %event.external_ref))]
pub async fn record_external_payment<C>(
    db: &C,
    event: ExternalPayment,
) -> Result<ExternalPaymentReceipt>
where
    C: TransactionTrait,
{
    let mut unit = UnitOfWork::begin(db).await?;

    if let Some(existing) = payment_by_external_ref(unit.txn(), &event.external_ref).await? {
        let commission =
            crate::core::commission::commission_for_payment(unit.txn(), existing.id).await?;
        info!(payment_id = existing.id, "External payment already recorded");
        return Ok(ExternalPaymentReceipt {
            payment: existing,
            credited: None,
            commission,
            duplicate: true,
        });
    }

    accounts::get_user(unit.txn(), event.user_id).await?;
    if let Some(site_id) = event.site_id {
        accounts::get_owned_site(unit.txn(), event.user_id, site_id).await?;
    }

    let payment = record_payment(
        unit.txn(),
        PaymentDraft {
            user_id: event.user_id,
            site_id: event.site_id,
            amount: event.amount,
            payment_type: event.payment_type,
            method: event.method,
            external_ref: Some(event.external_ref.clone()),
        },
    )
    .await?;

    let credited = match event.payment_credits {
        Some(credits) => {
            let row = ledger::credit(
                unit.txn(),
                Posting::new(
                    event.user_id,
                    Currency::Payment,
                    credits,
                    TransactionKind::Purchase,
                    format!("{} payment {}", event.method, event.external_ref),
                )
                .linked(LedgerLink::Payment(payment.id)),
            )
            .await?;
            Some(ledger::get_balance(unit.txn(), row.user_id, Currency::Payment).await?)
        }
        None => None,
    };

    unit.queue_commission(payment.clone(), event.subscription_id);
    unit.queue_notification(
        NewNotification::new(
            event.user_id,
            NotificationKind::Payment,
            "Payment received",
            format!("We received your payment of ${}.", event.amount),
        )
        .with_link("/billing")
        .with_icon("credit-card")
        .with_metadata(json!({
            "payment_id": payment.id,
            "method": event.method.to_string(),
        })),
    );

    let committed = unit.commit().await?;

    info!(payment_id = payment.id, amount = %payment.amount, "External payment recorded");
    Ok(ExternalPaymentReceipt {
        payment,
        credited,
        commission: committed.commissions.into_iter().next(),
        duplicate: false,
    })
}
