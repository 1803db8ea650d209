//! Transaction entity - the append-only ledger history.
//!
//! Each row records one balance mutation together with the balance it
//! produced, so replaying a user's rows for a currency in `id` order from zero
//! reproduces every snapshot. Rows are never updated or deleted.
use super::sea_orm_active_enums::{Currency, TransactionKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier, increasing in creation order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User whose balance changed
    pub user_id: i64,
    /// Ledger the amount applies to
    pub currency: Currency,
    /// Signed amount (positive for credits, negative for debits)
    pub amount: i64,
    /// Balance right after this transaction
    pub balance: i64,
    /// Reason for the mutation
    pub kind: TransactionKind,
    /// Human-readable description of the transaction
    pub description: String,
    /// Optional link to the site the mutation concerns
    pub site_id: Option<i64>,
    /// Optional link to the payment the mutation concerns
    pub payment_id: Option<i64>,
    /// When the transaction was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one user
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
