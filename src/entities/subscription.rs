//! Subscription entity - a site's plan, lifecycle state and billing dates.
//!
//! `amount` and `monthly_rate` are snapshots of the catalog at creation or
//! plan-change time and are never recomputed when the catalog changes.

use super::sea_orm_active_enums::{Plan, SubscriptionStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subscription database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    /// Unique identifier for the subscription
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Site the subscription covers
    pub site_id: i64,
    /// Site owner at creation time
    pub user_id: i64,
    /// Subscribed plan
    pub plan: Plan,
    /// Lifecycle state
    pub status: SubscriptionStatus,
    /// Annual price snapshot in dollars
    pub amount: Decimal,
    /// Monthly rate snapshot in dollars
    pub monthly_rate: Decimal,
    /// Set on first activation
    pub start_date: Option<DateTimeUtc>,
    /// End of the paid period
    pub end_date: Option<DateTimeUtc>,
    /// When the next renewal is due
    pub next_billing_date: Option<DateTimeUtc>,
    /// When the subscription was cancelled or expired
    pub cancelled_at: Option<DateTimeUtc>,
    /// Free-text reason given on cancellation
    pub cancel_reason: Option<String>,
    /// Whether the subscription should renew when it lapses
    pub auto_renew: bool,
    /// When the subscription was created
    pub created_at: DateTimeUtc,
    /// When the subscription was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Subscription and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each subscription belongs to one site
    #[sea_orm(
        belongs_to = "super::site::Entity",
        from = "Column::SiteId",
        to = "super::site::Column::Id"
    )]
    Site,
}

impl Related<super::site::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Site.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
