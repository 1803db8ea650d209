//! Site entity - an affiliate site whose entitlements follow its subscription.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Site database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sites")]
pub struct Model {
    /// Unique identifier for the site
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User that owns the site
    pub owner_id: i64,
    /// Display name
    pub name: String,
    /// True while an ACTIVE subscription covers the site
    pub is_active: bool,
    /// Feature flag derived from the subscribed plan
    pub has_game_screenshots: bool,
    /// Feature flag derived from the subscribed plan
    pub has_bonus_code_feed: bool,
    /// When the site was registered
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Site and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each site belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,
    /// A site keeps the history of its subscriptions
    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscriptions,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
