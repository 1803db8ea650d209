//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod commission;
pub mod currency_balance;
pub mod notification;
pub mod payment;
pub mod sea_orm_active_enums;
pub mod site;
pub mod subscription;
pub mod transaction;
pub mod user;

// Re-export specific types to avoid conflicts
pub use commission::{Column as CommissionColumn, Entity as Commission, Model as CommissionModel};
pub use currency_balance::{
    Column as CurrencyBalanceColumn, Entity as CurrencyBalance, Model as CurrencyBalanceModel,
};
pub use notification::{
    Column as NotificationColumn, Entity as Notification, Model as NotificationModel,
};
pub use payment::{Column as PaymentColumn, Entity as Payment, Model as PaymentModel};
pub use site::{Column as SiteColumn, Entity as Site, Model as SiteModel};
pub use subscription::{
    Column as SubscriptionColumn, Entity as Subscription, Model as SubscriptionModel,
};
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
