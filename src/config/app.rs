//! Application configuration loading from config.toml
//!
//! The file is optional. Every `[plans.<id>]` table replaces the built-in
//! terms of that plan only; plans not mentioned keep their defaults.
//!
//! ```toml
//! grace_period_days = 7
//!
//! [plans.basic]
//! annual_price = 300
//! monthly_rate = 25
//! included_credits = 10
//! game_screenshots = false
//! bonus_code_feed = false
//! ```

use crate::{
    core::plan::{MAX_INCLUDED_CREDITS, PlanCatalog, PlanTerms},
    entities::sea_orm_active_enums::Plan,
    errors::{Error, Result},
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Days a PAST_DUE subscription is kept before the sweep expires it.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 7;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    grace_period_days: Option<i64>,
    #[serde(default)]
    plans: BTreeMap<Plan, PlanTerms>,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Plan pricing and entitlements
    pub catalog: PlanCatalog,
    /// Grace period for PAST_DUE subscriptions
    pub grace_period_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: PlanCatalog::default(),
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
        }
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let raw: RawConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;

    let grace_period_days = raw.grace_period_days.unwrap_or(DEFAULT_GRACE_PERIOD_DAYS);
    if grace_period_days < 0 {
        return Err(Error::Config {
            message: format!("grace_period_days must not be negative, got {grace_period_days}"),
        });
    }

    for (plan, terms) in &raw.plans {
        if terms.annual_price.is_sign_negative() || terms.included_credits < 0 {
            return Err(Error::Config {
                message: format!("Plan {plan} has negative pricing or credits"),
            });
        }
        if terms.included_credits > MAX_INCLUDED_CREDITS {
            return Err(Error::Config {
                message: format!(
                    "Plan {plan} includes {} credits/month, above the limit of {MAX_INCLUDED_CREDITS}",
                    terms.included_credits
                ),
            });
        }
    }

    Ok(AppConfig {
        catalog: PlanCatalog::default().with_overrides(raw.plans),
        grace_period_days,
    })
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A plan table is incomplete or carries negative values
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    parse_config(&contents)
}

/// Loads configuration from `CONFIG_PATH` (default `./config.toml`), falling
/// back to built-in defaults when the file does not exist.
pub fn load_default_config() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        load_config(&path)
    } else {
        info!("No configuration file at {path}, using built-in plan catalog");
        Ok(AppConfig::default())
    }
}
