//! Currency balance entity - one row per user per currency.
//!
//! `balance` always equals the signed sum of the user's transactions in that
//! currency; `lifetime` only ever grows. Rows are created lazily and are never
//! deleted.

use super::sea_orm_active_enums::Currency;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Currency balance database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "currency_balances")]
pub struct Model {
    /// Unique identifier for the row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the balance
    pub user_id: i64,
    /// Which ledger this row tracks
    pub currency: Currency,
    /// Current balance, never negative
    pub balance: i64,
    /// Total ever credited
    pub lifetime: i64,
    /// Last mutation time
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `CurrencyBalance` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each balance belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
