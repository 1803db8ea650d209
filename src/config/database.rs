//! Database configuration module.
//!
//! This module handles the `SQLite` connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust
//! structs. Uniqueness rules that entity attributes cannot express (one
//! balance row per user and currency, one ACTIVE subscription per site) are
//! added as indexes afterwards.

use crate::entities::{
    Commission, CurrencyBalance, CurrencyBalanceColumn, Notification, Payment, Site, Subscription,
    Transaction, TransactionColumn, User,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/affiliate_ledger.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable or
/// returns the default local `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by [`get_database_url`],
/// creating the parent directory of a `SQLite` file first.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    if let Some(parent) = sqlite_parent_dir(&database_url) {
        std::fs::create_dir_all(parent)?;
    }
    debug!("Connecting to {database_url}");
    Database::connect(&database_url).await.map_err(Into::into)
}

fn sqlite_parent_dir(database_url: &str) -> Option<&Path> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables and indexes if they do not exist yet.
///
/// Safe to run on every start-up.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, User).await?;
    create_table(db, &schema, Site).await?;
    create_table(db, &schema, CurrencyBalance).await?;
    create_table(db, &schema, Transaction).await?;
    create_table(db, &schema, Subscription).await?;
    create_table(db, &schema, Payment).await?;
    create_table(db, &schema, Commission).await?;
    create_table(db, &schema, Notification).await?;

    let balance_key = Index::create()
        .if_not_exists()
        .name("idx_currency_balances_user_currency")
        .table(CurrencyBalance)
        .col(CurrencyBalanceColumn::UserId)
        .col(CurrencyBalanceColumn::Currency)
        .unique()
        .to_owned();
    db.execute(builder.build(&balance_key)).await?;

    let history = Index::create()
        .if_not_exists()
        .name("idx_transactions_user_currency")
        .table(Transaction)
        .col(TransactionColumn::UserId)
        .col(TransactionColumn::Currency)
        .to_owned();
    db.execute(builder.build(&history)).await?;

    // Partial indexes are not expressible through the query builder.
    db.execute_unprepared(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active_per_site
            ON subscriptions (site_id)
            WHERE status = 'active'",
    )
    .await?;

    info!("Database tables ensured");
    Ok(())
}
