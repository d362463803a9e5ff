//! Notification persistence and lifecycle updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;
use tracing::debug;

use taskmind_core::lifecycle::validate_notification_transition;
use taskmind_core::types::{
    NewNotification, Notification, NotificationStatus, NotificationType, NotificationUpdate,
};

use crate::codec;
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::filter::{Filter, SortDirection};
use crate::repository::{delegate_repository, Entity, Repository};

const NOTIFICATION_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "notification_type",
    "priority",
    "status",
    "title",
    "message",
    "read",
    "timestamp",
    "actions",
    "expires_at",
    "metadata",
    "created_at",
    "updated_at",
];

impl Entity for Notification {
    type Draft = NewNotification;
    type Patch = NotificationUpdate;

    const NAME: &'static str = "Notification";
    const TABLE: &'static str = "notifications";
    const COLUMNS: &'static [&'static str] = NOTIFICATION_COLUMNS;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_draft(draft: NewNotification, id: String, now: DateTime<Utc>) -> Self {
        Notification {
            id,
            user_id: draft.user_id,
            notification_type: draft.notification_type,
            priority: draft.priority,
            status: NotificationStatus::Pending,
            title: draft.title,
            message: draft.message,
            read: false,
            timestamp: draft.timestamp.unwrap_or(now),
            actions: draft.actions,
            expires_at: draft.expires_at,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", codec::text(self.id.as_str())),
            ("user_id", codec::opt_text(self.user_id.clone())),
            ("notification_type", codec::text(self.notification_type.as_str())),
            ("priority", codec::text(self.priority.as_str())),
            ("status", codec::text(self.status.as_str())),
            ("title", codec::text(self.title.as_str())),
            ("message", codec::text(self.message.as_str())),
            ("read", Value::Integer(i64::from(self.read))),
            ("timestamp", codec::datetime(&self.timestamp)),
            ("actions", codec::json(&self.actions)?),
            ("expires_at", codec::opt_datetime(self.expires_at.as_ref())),
            ("metadata", codec::metadata(&self.metadata)?),
            ("created_at", codec::datetime(&self.created_at)),
            ("updated_at", codec::datetime(&self.updated_at)),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Notification {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            notification_type: codec::enum_column(row, "notification_type")?,
            priority: codec::enum_column(row, "priority")?,
            status: codec::enum_column(row, "status")?,
            title: row.get("title")?,
            message: row.get::<_, Option<String>>("message")?.unwrap_or_default(),
            read: row.get::<_, Option<bool>>("read")?.unwrap_or(false),
            timestamp: codec::datetime_column(row, "timestamp")?,
            actions: codec::json_column(row, "actions")?,
            expires_at: codec::opt_datetime_column(row, "expires_at")?,
            metadata: codec::metadata_column(row, "metadata")?,
            created_at: codec::datetime_column(row, "created_at")?,
            updated_at: codec::datetime_column(row, "updated_at")?,
        })
    }

    fn patch_columns(patch: &NotificationUpdate) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = Vec::new();
        if let Some(kind) = patch.notification_type {
            columns.push(("notification_type", codec::text(kind.as_str())));
        }
        if let Some(priority) = patch.priority {
            columns.push(("priority", codec::text(priority.as_str())));
        }
        if let Some(status) = patch.status {
            columns.push(("status", codec::text(status.as_str())));
        }
        if let Some(title) = &patch.title {
            columns.push(("title", codec::text(title.as_str())));
        }
        if let Some(message) = &patch.message {
            columns.push(("message", codec::text(message.as_str())));
        }
        if let Some(read) = patch.read {
            columns.push(("read", Value::Integer(i64::from(read))));
        }
        if let Some(actions) = &patch.actions {
            columns.push(("actions", codec::json(actions)?));
        }
        if let Some(expires_at) = &patch.expires_at {
            columns.push(("expires_at", codec::opt_datetime(expires_at.as_ref())));
        }
        if let Some(metadata) = &patch.metadata {
            columns.push(("metadata", codec::metadata(metadata)?));
        }
        Ok(columns)
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(StorageError::Validation(
                "notification title must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationStatistics {
    pub total: i64,
    pub unread: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
}

/// Statuses that imply the user has seen the notification.
fn implies_read(status: NotificationStatus) -> bool {
    matches!(
        status,
        NotificationStatus::Read | NotificationStatus::ActedUpon
    )
}

pub struct NotificationRepository {
    repo: Repository<Notification>,
}

impl NotificationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: Repository::new(db),
        }
    }

    delegate_repository!(Notification);

    /// Update a notification. A status change must follow the notification
    /// lifecycle; moving to READ or ACTED_UPON also sets `read`. Returns
    /// `None` when no notification has `id`.
    pub fn update(&self, id: &str, patch: &NotificationUpdate) -> Result<Option<Notification>> {
        match self.checked_patch(id, patch)? {
            Some(patch) => self.repo.update(id, &patch),
            None => Ok(None),
        }
    }

    pub fn update_many(
        &self,
        items: &[(String, NotificationUpdate)],
    ) -> Result<Vec<Notification>> {
        let mut checked = Vec::with_capacity(items.len());
        for (id, patch) in items {
            let patch = self
                .checked_patch(id, patch)?
                .ok_or_else(|| StorageError::NotFound {
                    entity: Notification::NAME,
                    id: id.clone(),
                })?;
            checked.push((id.clone(), patch));
        }
        self.repo.update_many(&checked)
    }

    /// Move a notification to `status`.
    pub fn mark_as(&self, id: &str, status: NotificationStatus) -> Result<Notification> {
        let patch = NotificationUpdate {
            status: Some(status),
            ..NotificationUpdate::default()
        };
        let patch = self
            .checked_patch(id, &patch)?
            .ok_or_else(|| StorageError::NotFound {
                entity: Notification::NAME,
                id: id.to_string(),
            })?;
        self.repo.update_existing(id, &patch)
    }

    /// Flag every unread notification (of one user, or of everyone) as
    /// read. Delivered ones also move to READ. Returns the number changed.
    pub fn mark_all_read(&self, user_id: Option<&str>) -> Result<usize> {
        let mut sql = "UPDATE notifications
             SET read = 1,
                 status = CASE WHEN status = 'DELIVERED' THEN 'READ' ELSE status END,
                 updated_at = MAX(?, created_at)
             WHERE read = 0"
            .to_string();
        let mut params = vec![codec::datetime(&Utc::now())];
        if let Some(user_id) = user_id {
            sql.push_str(" AND user_id = ?");
            params.push(codec::text(user_id));
        }
        let changed = self.repo.db().run(&sql, &params)?.rows_affected;
        debug!(changed, "Marked notifications read");
        Ok(changed)
    }

    /// Move every pending or delivered notification whose expiry is at or
    /// before `now` to EXPIRED. Returns the number expired.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let stamp = codec::datetime(&now);
        let expired = self
            .repo
            .db()
            .run(
                "UPDATE notifications
                 SET status = 'EXPIRED', updated_at = MAX(?, created_at)
                 WHERE expires_at IS NOT NULL
                   AND expires_at <= ?
                   AND status IN ('PENDING', 'DELIVERED')",
                &[stamp.clone(), stamp],
            )?
            .rows_affected;
        debug!(expired, "Expired notifications");
        Ok(expired)
    }

    /// A user's notifications, newest first.
    pub fn find_by_user(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.repo.find_all(
            &Filter::new()
                .eq_text("user_id", user_id)
                .order_by("timestamp", SortDirection::Desc),
        )
    }

    /// Unread notifications, newest first.
    pub fn find_unread(&self, user_id: Option<&str>) -> Result<Vec<Notification>> {
        let mut filter = Filter::new().eq("read", Value::Integer(0));
        if let Some(user_id) = user_id {
            filter = filter.eq_text("user_id", user_id);
        }
        self.repo
            .find_all(&filter.order_by("timestamp", SortDirection::Desc))
    }

    pub fn find_by_status(&self, status: NotificationStatus) -> Result<Vec<Notification>> {
        self.repo.find_all(
            &Filter::new()
                .eq_text("status", status.as_str())
                .order_by("timestamp", SortDirection::Desc),
        )
    }

    pub fn find_by_type(&self, kind: NotificationType) -> Result<Vec<Notification>> {
        self.repo.find_all(
            &Filter::new()
                .eq_text("notification_type", kind.as_str())
                .order_by("timestamp", SortDirection::Desc),
        )
    }

    pub fn statistics(&self, filter: &Filter) -> Result<NotificationStatistics> {
        let unread_filter = filter
            .predicates_only()
            .eq("read", Value::Integer(0));
        Ok(NotificationStatistics {
            total: self.repo.count(filter)?,
            unread: self.repo.count(&unread_filter)?,
            by_status: self.repo.group_counts("status", filter)?,
            by_type: self.repo.group_counts("notification_type", filter)?,
            by_priority: self.repo.group_counts("priority", filter)?,
        })
    }

    /// `None` means the status check found no row for `id`.
    fn checked_patch(
        &self,
        id: &str,
        patch: &NotificationUpdate,
    ) -> Result<Option<NotificationUpdate>> {
        let Some(next) = patch.status else {
            return Ok(Some(patch.clone()));
        };
        let Some(current) = self.repo.find_by_id(id)? else {
            return Ok(None);
        };
        validate_notification_transition(current.status, next)?;
        let mut patch = patch.clone();
        if implies_read(next) && patch.read.is_none() {
            patch.read = Some(true);
        }
        Ok(Some(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use taskmind_core::types::{NotificationAction, Priority};

    use crate::migrations::Migrator;

    fn make_repo() -> NotificationRepository {
        let db = Arc::new(Database::in_memory());
        Migrator::new(db.clone()).migrate_up().unwrap();
        NotificationRepository::new(db)
    }

    fn for_user(user: &str, title: &str) -> NewNotification {
        let mut draft = NewNotification::new(title, "body");
        draft.user_id = Some(user.to_string());
        draft
    }

    #[test]
    fn test_create_roundtrip_with_actions() {
        let repo = make_repo();
        let mut draft = for_user("u1", "Review PR");
        draft.priority = Priority::Urgent;
        draft.actions = vec![NotificationAction {
            id: "open".into(),
            label: "Open".into(),
            kind: "link".into(),
            payload: serde_json::json!({"url": "https://example.test/pr/1"}),
        }];
        let created = repo.create(draft).unwrap();
        assert_eq!(created.status, NotificationStatus::Pending);
        assert!(!created.read);
        assert_eq!(created.timestamp, created.created_at);
        assert_eq!(repo.find_by_id(&created.id).unwrap().unwrap(), created);
    }

    #[test]
    fn test_mark_as_follows_lifecycle() {
        let repo = make_repo();
        let n = repo.create(for_user("u1", "Ping")).unwrap();

        assert!(matches!(
            repo.mark_as(&n.id, NotificationStatus::Read),
            Err(StorageError::InvalidTransition(_))
        ));
        repo.mark_as(&n.id, NotificationStatus::Delivered).unwrap();
        let read = repo.mark_as(&n.id, NotificationStatus::Read).unwrap();
        assert!(read.read);
        assert_eq!(read.status, NotificationStatus::Read);

        repo.mark_as(&n.id, NotificationStatus::Dismissed).unwrap();
        assert!(repo.mark_as(&n.id, NotificationStatus::Delivered).is_err());
    }

    #[test]
    fn test_missing_notification() {
        let repo = make_repo();
        let patch = NotificationUpdate {
            status: Some(NotificationStatus::Delivered),
            ..NotificationUpdate::default()
        };
        assert_eq!(repo.update("ghost", &patch).unwrap(), None);
        assert!(matches!(
            repo.mark_as("ghost", NotificationStatus::Delivered),
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            repo.update_many(&[("ghost".to_string(), patch)]),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_mark_all_read_scoped_to_user() {
        let repo = make_repo();
        let a = repo.create(for_user("u1", "a")).unwrap();
        repo.create(for_user("u1", "b")).unwrap();
        repo.create(for_user("u2", "c")).unwrap();
        repo.mark_as(&a.id, NotificationStatus::Delivered).unwrap();

        assert_eq!(repo.mark_all_read(Some("u1")).unwrap(), 2);
        assert!(repo.find_unread(Some("u1")).unwrap().is_empty());
        assert_eq!(repo.find_unread(None).unwrap().len(), 1);
        let a = repo.find_by_id(&a.id).unwrap().unwrap();
        assert_eq!(a.status, NotificationStatus::Read);
        assert_eq!(repo.mark_all_read(Some("u1")).unwrap(), 0);
    }

    #[test]
    fn test_expire_due() {
        let repo = make_repo();
        let now = Utc::now();
        let mut stale = for_user("u1", "stale");
        stale.expires_at = Some(now - Duration::minutes(5));
        let stale = repo.create(stale).unwrap();
        let mut fresh = for_user("u1", "fresh");
        fresh.expires_at = Some(now + Duration::minutes(5));
        repo.create(fresh).unwrap();
        let mut dismissed = for_user("u1", "dismissed");
        dismissed.expires_at = Some(now - Duration::minutes(5));
        let dismissed = repo.create(dismissed).unwrap();
        repo.mark_as(&dismissed.id, NotificationStatus::Dismissed).unwrap();

        assert_eq!(repo.expire_due(now).unwrap(), 1);
        let stale = repo.find_by_id(&stale.id).unwrap().unwrap();
        assert_eq!(stale.status, NotificationStatus::Expired);
        assert_eq!(repo.find_by_status(NotificationStatus::Expired).unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_user_newest_first() {
        let repo = make_repo();
        let now = Utc::now();
        for minutes in [3, 1, 2] {
            let mut draft = for_user("u1", &format!("t{}", minutes));
            draft.timestamp = Some(now - Duration::minutes(minutes));
            repo.create(draft).unwrap();
        }
        let titles: Vec<_> = repo
            .find_by_user("u1")
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_statistics() {
        let repo = make_repo();
        let mut alert = for_user("u1", "disk");
        alert.notification_type = NotificationType::Alert;
        let alert = repo.create(alert).unwrap();
        repo.create(for_user("u1", "hello")).unwrap();
        repo.mark_as(&alert.id, NotificationStatus::Delivered).unwrap();
        repo.mark_as(&alert.id, NotificationStatus::ActedUpon).unwrap();

        let stats = repo.statistics(&Filter::new()).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unread, 1);
        assert_eq!(stats.by_type.get("ALERT"), Some(&1));
        assert_eq!(stats.by_status.get("ACTED_UPON"), Some(&1));
        assert_eq!(stats.by_priority.get("MEDIUM"), Some(&2));
        assert_eq!(repo.find_by_type(NotificationType::Alert).unwrap().len(), 1);
    }
}
