//! Shared test utilities for the ledger core.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{
        accounts,
        ledger::{self, Posting},
        orchestrator::{self, PaymentDraft},
        plan::PlanCatalog,
        subscription,
    },
    entities::{
        self,
        sea_orm_active_enums::{Currency, PaymentMethod, PaymentType, Plan, TransactionKind},
    },
    errors::Result,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::DatabaseConnection;
use tracing_subscriber::EnvFilter;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Routes `tracing` output to the test harness. Honors `RUST_LOG`; safe to call
/// from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Creates a user without a referrer.
pub async fn create_test_user(
    db: &DatabaseConnection,
    email: &str,
    commission_rate: Decimal,
) -> Result<entities::user::Model> {
    accounts::create_user(db, email, None, commission_rate).await
}

/// Creates a user referred by `referrer_id`, with a zero rate of their own.
pub async fn create_referred_user(
    db: &DatabaseConnection,
    email: &str,
    referrer_id: i64,
) -> Result<entities::user::Model> {
    accounts::create_user(db, email, Some(referrer_id), Decimal::ZERO).await
}

/// Creates an inactive site owned by `owner_id`.
pub async fn create_test_site(
    db: &DatabaseConnection,
    owner_id: i64,
    name: &str,
) -> Result<entities::site::Model> {
    accounts::create_site(db, owner_id, name).await
}

/// Credits `amount` to a user as a BONUS.
pub async fn fund(
    db: &DatabaseConnection,
    user_id: i64,
    currency: Currency,
    amount: i64,
) -> Result<entities::transaction::Model> {
    ledger::credit(
        db,
        Posting::new(user_id, currency, amount, TransactionKind::Bonus, "Test funding"),
    )
    .await
}

/// Records a card payment for a subscription.
///
/// # Defaults
/// * `site_id`: None
/// * `external_ref`: None
pub async fn create_test_payment(
    db: &DatabaseConnection,
    user_id: i64,
    amount: Decimal,
) -> Result<entities::payment::Model> {
    orchestrator::record_payment(
        db,
        PaymentDraft {
            user_id,
            site_id: None,
            amount,
            payment_type: PaymentType::Subscription,
            method: PaymentMethod::Card,
            external_ref: None,
        },
    )
    .await
}

/// Creates and activates a subscription with the default catalog.
pub async fn create_active_subscription(
    db: &DatabaseConnection,
    site_id: i64,
    plan: Plan,
) -> Result<entities::subscription::Model> {
    let catalog = PlanCatalog::default();
    let pending = subscription::create_subscription(db, &catalog, site_id, plan, true).await?;
    subscription::activate(db, &catalog, pending.id).await
}

/// Sets up a site owner and one inactive site.
/// Returns (db, owner, site).
pub async fn setup_with_site() -> Result<(
    DatabaseConnection,
    entities::user::Model,
    entities::site::Model,
)> {
    let db = setup_test_db().await?;
    let owner = create_test_user(&db, "owner@example.com", dec!(0)).await?;
    let site = create_test_site(&db, owner.id, "casino.example").await?;
    Ok((db, owner, site))
}

/// Sets up a user holding `amount` credits of `currency`.
pub async fn setup_with_balance(
    currency: Currency,
    amount: i64,
) -> Result<(DatabaseConnection, entities::user::Model)> {
    let db = setup_test_db().await?;
    let user = create_test_user(&db, "funded@example.com", dec!(0)).await?;
    fund(&db, user.id, currency, amount).await?;
    Ok((db, user))
}

/// Sets up a referrer with `rate` and a user they referred.
/// Returns (db, referrer, referred).
pub async fn setup_referral(
    rate: Decimal,
) -> Result<(
    DatabaseConnection,
    entities::user::Model,
    entities::user::Model,
)> {
    let db = setup_test_db().await?;
    let referrer = create_test_user(&db, "referrer@example.com", rate).await?;
    let referred = create_referred_user(&db, "referred@example.com", referrer.id).await?;
    Ok((db, referrer, referred))
}

/// Sets up a site with an ACTIVE subscription on `plan`.
/// Returns (db, site, subscription); the site reflects the activation.
pub async fn setup_with_active_subscription(
    plan: Plan,
) -> Result<(
    DatabaseConnection,
    entities::site::Model,
    entities::subscription::Model,
)> {
    let (db, _owner, site) = setup_with_site().await?;
    let subscription = create_active_subscription(&db, site.id, plan).await?;
    let site = accounts::get_site(&db, site.id).await?;
    Ok((db, site, subscription))
}
