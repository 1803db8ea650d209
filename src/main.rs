//! Lapse sweep entry point, meant to be run by cron.
//!
//! Loads `.env` and `config.toml`, makes sure the schema exists, moves lapsed
//! subscriptions to PAST_DUE or EXPIRED, logs the result and exits.

use affiliate_ledger::{
    config::{self, database},
    core::subscription,
    errors::Result,
};
use chrono::Utc;
use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the application configuration
    let app_config = config::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {e}"))?;

    // 4. Connect and ensure the schema
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {e}"))?;

    // 5. One sweep pass
    let report =
        subscription::sweep_lapsed_subscriptions(&db, Utc::now(), app_config.grace_period_days)
            .await?;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some subscriptions could not be swept");
    }
    info!(
        past_due = ?report.past_due,
        expired = ?report.expired,
        "Sweep complete"
    );

    Ok(())
}
