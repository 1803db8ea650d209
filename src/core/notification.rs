//! Notification sink.
//!
//! Only the creation of notification records is handled here; delivery is
//! somebody else's job. Financial operations call [`notify`], which runs the
//! insert inside a savepoint and never fails the caller: a broken notification
//! is logged and rolled back on its own.

use crate::{
    entities::{Notification, notification, sea_orm_active_enums::NotificationKind},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use serde_json::Value;
use tracing::{debug, warn};

/// A notification waiting to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    /// Recipient
    pub user_id: i64,
    /// Category
    pub kind: NotificationKind,
    /// Headline
    pub title: String,
    /// Body
    pub message: String,
    /// Optional in-app link
    pub link: Option<String>,
    /// Optional icon name
    pub icon: Option<String>,
    /// Optional structured data for the UI
    pub metadata: Option<Value>,
}

impl NewNotification {
    /// Starts a notification with the mandatory fields.
    pub fn new(
        user_id: i64,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            link: None,
            icon: None,
            metadata: None,
        }
    }

    /// Attaches an in-app link.
    #[must_use]
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Attaches an icon name.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Attaches structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Inserts a notification record, propagating any failure.
pub async fn create_notification<C>(
    db: &C,
    new: NewNotification,
) -> Result<notification::Model>
where
    C: ConnectionTrait,
{
    let metadata = new.metadata.map(|value| value.to_string());
    let model = notification::ActiveModel {
        user_id: Set(new.user_id),
        kind: Set(new.kind),
        title: Set(new.title),
        message: Set(new.message),
        link: Set(new.link),
        icon: Set(new.icon),
        metadata: Set(metadata),
        is_read: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

/// Records a notification on a best-effort basis.
///
/// The insert runs in its own savepoint; on failure it is rolled back, the
/// error is logged and `None` is returned so the surrounding operation carries
/// on.
pub async fn notify<C>(db: &C, new: NewNotification) -> Option<notification::Model>
where
    C: TransactionTrait,
{
    let user_id = new.user_id;
    let kind = new.kind;

    let savepoint = match db.begin().await {
        Ok(savepoint) => savepoint,
        Err(e) => {
            warn!(user_id, %kind, "Could not open notification savepoint: {e}");
            return None;
        }
    };

    match create_notification(&savepoint, new).await {
        Ok(model) => match savepoint.commit().await {
            Ok(()) => {
                debug!(user_id, %kind, notification_id = model.id, "Notification recorded");
                Some(model)
            }
            Err(e) => {
                warn!(user_id, %kind, "Could not commit notification: {e}");
                None
            }
        },
        Err(e) => {
            warn!(user_id, %kind, "Dropping notification: {e}");
            if let Err(rollback) = savepoint.rollback().await {
                warn!(user_id, "Notification rollback failed: {rollback}");
            }
            None
        }
    }
}

/// Lists a user's notifications, newest first.
pub async fn notifications_for_user<C>(db: &C, user_id: i64) -> Result<Vec<notification::Model>>
where
    C: ConnectionTrait,
{
    Notification::find()
        .filter(notification::Column::UserId.eq(user_id))
        .order_by_desc(notification::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_notification_integration() -> Result<()> {
        let db = setup_test_db().await?;

        let created = create_notification(
            &db,
            NewNotification::new(7, NotificationKind::Credits, "Credits added", "You got 10")
                .with_link("/credits")
                .with_icon("coins")
                .with_metadata(json!({ "amount": 10 })),
        )
        .await?;

        assert_eq!(created.user_id, 7);
        assert_eq!(created.kind, NotificationKind::Credits);
        assert_eq!(created.link.as_deref(), Some("/credits"));
        assert_eq!(created.icon.as_deref(), Some("coins"));
        assert!(!created.is_read);

        let metadata: Value = serde_json::from_str(created.metadata.as_deref().unwrap()).unwrap();
        assert_eq!(metadata["amount"], 10);

        Ok(())
    }

    #[tokio::test]
    async fn test_notify_inside_outer_transaction() -> Result<()> {
        let db = setup_test_db().await?;

        let txn = db.begin().await?;
        let recorded = notify(
            &txn,
            NewNotification::new(1, NotificationKind::Payment, "Paid", "Thanks"),
        )
        .await;
        assert!(recorded.is_some());
        txn.commit().await?;

        assert_eq!(notifications_for_user(&db, 1).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_notify_swallows_failures() -> Result<()> {
        let db = setup_test_db().await?;
        db.execute_unprepared("DROP TABLE notifications").await?;

        let txn = db.begin().await?;
        let recorded = notify(
            &txn,
            NewNotification::new(1, NotificationKind::Payment, "Paid", "Thanks"),
        )
        .await;
        assert!(recorded.is_none());

        // The outer transaction is still usable after the failed savepoint
        txn.commit().await?;
        Ok(())
    }
}
