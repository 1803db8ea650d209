//! Payment entity - an immutable record of a settled payment.
//!
//! Payments anchor commission computation: at most one commission exists per
//! payment. Externally captured payments carry their provider reference in
//! `external_ref`, which makes re-delivered events detectable.

use super::sea_orm_active_enums::{PaymentMethod, PaymentStatus, PaymentType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier for the payment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Paying user
    pub user_id: i64,
    /// Site the payment was made for, if any
    pub site_id: Option<i64>,
    /// Face value in dollars
    pub amount: Decimal,
    /// ISO currency code of `amount`
    pub currency: String,
    /// Settlement state (always succeeded)
    pub status: PaymentStatus,
    /// What the payment bought
    pub payment_type: PaymentType,
    /// How it was funded
    pub method: PaymentMethod,
    /// Provider reference for externally captured payments
    #[sea_orm(unique)]
    pub external_ref: Option<String>,
    /// When the payment settled
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each payment belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    /// A payment yields at most one commission
    #[sea_orm(has_one = "super::commission::Entity")]
    Commission,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::commission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Commission.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
