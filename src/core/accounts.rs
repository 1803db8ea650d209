//! Identity, referral and site lookups.
//!
//! Users and sites belong to the surrounding portal; this module provides the
//! read side the ledger needs plus the small write helpers used on signup and
//! by admins (commission rate changes).

use crate::{
    entities::{Site, User, site, user},
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{Set, prelude::*};
use tracing::info;

/// Largest commission rate an admin may configure, in percent.
pub const MAX_COMMISSION_RATE: Decimal = Decimal::ONE_HUNDRED;

/// Fetches a user or fails with [`Error::NotFound`].
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

/// Fetches a site or fails with [`Error::NotFound`].
pub async fn get_site<C>(db: &C, site_id: i64) -> Result<site::Model>
where
    C: ConnectionTrait,
{
    Site::find_by_id(site_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("site", site_id))
}

/// Fetches a site and checks that `user_id` owns it.
pub async fn get_owned_site<C>(db: &C, user_id: i64, site_id: i64) -> Result<site::Model>
where
    C: ConnectionTrait,
{
    let site = get_site(db, site_id).await?;
    if site.owner_id != user_id {
        return Err(Error::NotSiteOwner { site_id, user_id });
    }
    Ok(site)
}

/// Registers a user, optionally attributed to a referrer.
pub async fn create_user<C>(
    db: &C,
    email: &str,
    referred_by_id: Option<i64>,
    commission_rate: Decimal,
) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    validate_rate(commission_rate)?;
    if email.trim().is_empty() {
        return Err(Error::Config {
            message: "User e-mail cannot be empty".to_string(),
        });
    }
    if let Some(referrer_id) = referred_by_id {
        get_user(db, referrer_id).await?;
    }

    let user = user::ActiveModel {
        email: Set(email.trim().to_string()),
        referred_by_id: Set(referred_by_id),
        commission_rate: Set(commission_rate),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(user.insert(db).await?)
}

/// Registers an inactive site with no entitlements.
pub async fn create_site<C>(db: &C, owner_id: i64, name: &str) -> Result<site::Model>
where
    C: ConnectionTrait,
{
    get_user(db, owner_id).await?;
    if name.trim().is_empty() {
        return Err(Error::Config {
            message: "Site name cannot be empty".to_string(),
        });
    }

    let site = site::ActiveModel {
        owner_id: Set(owner_id),
        name: Set(name.trim().to_string()),
        is_active: Set(false),
        has_game_screenshots: Set(false),
        has_bonus_code_feed: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(site.insert(db).await?)
}

/// Changes the rate a user earns on future referrals. Existing commissions keep
/// the rate they were created with.
pub async fn set_commission_rate<C>(db: &C, user_id: i64, rate: Decimal) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    validate_rate(rate)?;
    let existing = get_user(db, user_id).await?;
    let previous = existing.commission_rate;

    let mut active_model: user::ActiveModel = existing.into();
    active_model.commission_rate = Set(rate);
    let updated = active_model.update(db).await?;

    info!(user_id, %previous, %rate, "Commission rate changed");
    Ok(updated)
}

fn validate_rate(rate: Decimal) -> Result<()> {
    if rate.is_sign_negative() || rate > MAX_COMMISSION_RATE {
        return Err(Error::InvalidRate { rate });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_create_user_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = create_user(&db, "a@example.com", None, dec!(-1)).await;
        assert!(matches!(result, Err(Error::InvalidRate { .. })));

        let result = create_user(&db, "a@example.com", None, dec!(100.01)).await;
        assert!(matches!(result, Err(Error::InvalidRate { .. })));

        let result = create_user(&db, "   ", None, dec!(10)).await;
        assert!(matches!(result, Err(Error::Config { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_user_with_unknown_referrer() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_user(&db, "b@example.com", Some(42), dec!(0)).await;
        assert!(matches!(result, Err(Error::NotFound { entity: "user", .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_referral_back_reference() -> Result<()> {
        let db = setup_test_db().await?;
        let referrer = create_test_user(&db, "referrer@example.com", dec!(15)).await?;
        let referred = create_referred_user(&db, "referred@example.com", referrer.id).await?;

        let fetched = get_user(&db, referred.id).await?;
        assert_eq!(fetched.referred_by_id, Some(referrer.id));
        assert_eq!(get_user(&db, referrer.id).await?.commission_rate, dec!(15));
        Ok(())
    }

    #[tokio::test]
    async fn test_get_owned_site() -> Result<()> {
        let (db, owner, site) = setup_with_site().await?;
        let stranger = create_test_user(&db, "stranger@example.com", dec!(0)).await?;

        assert_eq!(get_owned_site(&db, owner.id, site.id).await?.id, site.id);
        assert!(matches!(
            get_owned_site(&db, stranger.id, site.id).await,
            Err(Error::NotSiteOwner { .. })
        ));
        assert!(matches!(
            get_owned_site(&db, owner.id, 999).await,
            Err(Error::NotFound { entity: "site", .. })
        ));
        assert!(!site.is_active);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_commission_rate() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "rate@example.com", dec!(10)).await?;

        let updated = set_commission_rate(&db, user.id, dec!(12.5)).await?;
        assert_eq!(updated.commission_rate, dec!(12.5));

        assert!(matches!(
            set_commission_rate(&db, user.id, dec!(150)).await,
            Err(Error::InvalidRate { .. })
        ));
        assert!(matches!(
            set_commission_rate(&db, 999, dec!(5)).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }
}
