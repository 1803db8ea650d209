//! User entity - identity and referral data consumed by the commission engine.
//!
//! Users are owned by the surrounding portal. This core only reads the
//! referral back-reference and the commission rate, and lets admins change
//! the rate.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Login e-mail, used only for display in notifications
    #[sea_orm(unique)]
    pub email: String,
    /// The user who referred this one, if any (lookup only, never ownership)
    pub referred_by_id: Option<i64>,
    /// Percentage this user earns on payments of the users they referred
    pub commission_rate: Decimal,
    /// When the user signed up
    pub created_at: DateTimeUtc,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One user owns many sites
    #[sea_orm(has_many = "super::site::Entity")]
    Sites,
    /// One user holds one balance row per currency
    #[sea_orm(has_many = "super::currency_balance::Entity")]
    Balances,
}

impl Related<super::site::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sites.def()
    }
}

impl Related<super::currency_balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Balances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
