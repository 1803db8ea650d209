//! Commission entity - a referral reward owed to a referrer for one payment.
//!
//! `percentage` is the referrer's rate at creation time and is never rewritten.
//! Only `status` and the terminal timestamps change after insertion.

use super::sea_orm_active_enums::CommissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Commission database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commissions")]
pub struct Model {
    /// Unique identifier for the commission
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who earns the commission
    pub referrer_id: i64,
    /// User whose payment triggered it
    pub referred_user_id: i64,
    /// Source payment; unique so a payment can never pay out twice
    #[sea_orm(unique)]
    pub payment_id: i64,
    /// Source subscription, when the payment bought one
    pub subscription_id: Option<i64>,
    /// Amount owed in dollars
    pub amount: Decimal,
    /// Referrer's rate snapshot
    pub percentage: Decimal,
    /// Payout state
    pub status: CommissionStatus,
    /// When the commission was created
    pub created_at: DateTimeUtc,
    /// When it was paid out
    pub paid_at: Option<DateTimeUtc>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTimeUtc>,
    /// Reason given on cancellation
    pub cancel_reason: Option<String>,
}

/// Defines relationships between Commission and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each commission comes from one payment
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id"
    )]
    Payment,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
