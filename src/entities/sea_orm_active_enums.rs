//! Closed enumerations stored as text columns.
//!
//! Every free-form string of the old portal (plan ids, currencies, ledger
//! kinds, statuses) is one of these, so the plan catalog and the transition
//! tables are checked exhaustively by the compiler.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! labelled {
    ($ty:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            /// Lowercase label, identical to the stored column value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// The two independent ledgers every user holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Nominal $1-equivalent credits used to pay for subscriptions and packs
    #[sea_orm(string_value = "payment")]
    Payment,
    /// Credits consumed by AI content generation
    #[sea_orm(string_value = "usage")]
    Usage,
}

labelled!(Currency {
    Payment => "payment",
    Usage => "usage",
});

/// Why a ledger transaction happened.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credit pack bought
    #[sea_orm(string_value = "purchase")]
    Purchase,
    /// Credits spent, including redemptions
    #[sea_orm(string_value = "usage")]
    Usage,
    /// Credits returned after a reversed charge
    #[sea_orm(string_value = "refund")]
    Refund,
    /// Promotional grant
    #[sea_orm(string_value = "bonus")]
    Bonus,
    /// Manual correction by an admin
    #[sea_orm(string_value = "admin_adjust")]
    AdminAdjust,
    /// Usage credits included with a plan
    #[sea_orm(string_value = "subscription")]
    Subscription,
}

labelled!(TransactionKind {
    Purchase => "purchase",
    Usage => "usage",
    Refund => "refund",
    Bonus => "bonus",
    AdminAdjust => "admin_adjust",
    Subscription => "subscription",
});

/// Subscription plans offered to sites.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Entry plan, no extra features
    #[sea_orm(string_value = "basic")]
    Basic,
    /// Adds game screenshots
    #[sea_orm(string_value = "pro")]
    Pro,
    /// Every feature, including the bonus code feed
    #[sea_orm(string_value = "everything")]
    Everything,
}

labelled!(Plan {
    Basic => "basic",
    Pro => "pro",
    Everything => "everything",
});

/// Subscription lifecycle states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, not yet paid for
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Paid and live
    #[sea_orm(string_value = "active")]
    Active,
    /// Renewal outstanding; the site stays live
    #[sea_orm(string_value = "past_due")]
    PastDue,
    /// Ended by the user or an admin
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    /// Lapsed without renewal
    #[sea_orm(string_value = "expired")]
    Expired,
}

labelled!(SubscriptionStatus {
    Pending => "pending",
    Active => "active",
    PastDue => "past_due",
    Cancelled => "cancelled",
    Expired => "expired",
});

/// Settlement state of a payment. Failed attempts are never persisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Money or credits were captured
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
}

labelled!(PaymentStatus {
    Succeeded => "succeeded",
});

/// What a payment bought.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// A subscription term
    #[sea_orm(string_value = "subscription")]
    Subscription,
    /// A credit pack
    #[sea_orm(string_value = "credit_purchase")]
    CreditPurchase,
}

labelled!(PaymentType {
    Subscription => "subscription",
    CreditPurchase => "credit_purchase",
});

/// How a payment was funded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid from the payment-currency ledger
    #[sea_orm(string_value = "credits")]
    Credits,
    /// Card charge through the external processor
    #[sea_orm(string_value = "card")]
    Card,
    /// PayPal
    #[sea_orm(string_value = "paypal")]
    PayPal,
    /// Cryptocurrency transfer
    #[sea_orm(string_value = "crypto")]
    Crypto,
}

labelled!(PaymentMethod {
    Credits => "credits",
    Card => "card",
    PayPal => "paypal",
    Crypto => "crypto",
});

/// Commission payout state. PAID and CANCELLED are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    /// Owed to the referrer
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Paid out
    #[sea_orm(string_value = "paid")]
    Paid,
    /// Voided, never paid
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

labelled!(CommissionStatus {
    Pending => "pending",
    Paid => "paid",
    Cancelled => "cancelled",
});

/// Category of a notification record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A payment was recorded
    #[sea_orm(string_value = "payment")]
    Payment,
    /// A subscription changed state
    #[sea_orm(string_value = "subscription")]
    Subscription,
    /// A commission was earned or settled
    #[sea_orm(string_value = "commission")]
    Commission,
    /// A balance changed
    #[sea_orm(string_value = "credits")]
    Credits,
    /// An admin edited the account
    #[sea_orm(string_value = "admin")]
    Admin,
}

labelled!(NotificationKind {
    Payment => "payment",
    Subscription => "subscription",
    Commission => "commission",
    Credits => "credits",
    Admin => "admin",
});
