//! Time entry persistence and duration aggregates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;

use taskmind_core::types::{minutes_between, NewTimeEntry, TimeEntry, TimeEntryUpdate};

use crate::codec;
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::filter::{compile, Filter, SortDirection};
use crate::repository::{delegate_repository, replace_tags, Entity, Repository};

const TIME_ENTRY_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "task_id",
    "start_time",
    "end_time",
    "duration_minutes",
    "description",
    "category",
    "entry_type",
    "billable",
    "tags",
    "metadata",
    "created_at",
    "updated_at",
];

impl Entity for TimeEntry {
    type Draft = NewTimeEntry;
    type Patch = TimeEntryUpdate;

    const NAME: &'static str = "TimeEntry";
    const TABLE: &'static str = "time_entries";
    const COLUMNS: &'static [&'static str] = TIME_ENTRY_COLUMNS;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_draft(draft: NewTimeEntry, id: String, now: DateTime<Utc>) -> Self {
        let duration_minutes = draft.duration_minutes.or_else(|| {
            draft
                .end_time
                .map(|end| minutes_between(draft.start_time, end))
        });
        TimeEntry {
            id,
            user_id: draft.user_id,
            task_id: draft.task_id,
            start_time: draft.start_time,
            end_time: draft.end_time,
            duration_minutes,
            description: draft.description,
            category: draft.category,
            entry_type: draft.entry_type,
            billable: draft.billable,
            tags: draft.tags,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", codec::text(self.id.as_str())),
            ("user_id", codec::opt_text(self.user_id.clone())),
            ("task_id", codec::opt_text(self.task_id.clone())),
            ("start_time", codec::datetime(&self.start_time)),
            ("end_time", codec::opt_datetime(self.end_time.as_ref())),
            ("duration_minutes", codec::opt_int(self.duration_minutes)),
            ("description", codec::text(self.description.as_str())),
            ("category", codec::text(self.category.as_str())),
            ("entry_type", codec::text(self.entry_type.as_str())),
            ("billable", Value::Integer(i64::from(self.billable))),
            ("tags", codec::json(&self.tags)?),
            ("metadata", codec::metadata(&self.metadata)?),
            ("created_at", codec::datetime(&self.created_at)),
            ("updated_at", codec::datetime(&self.updated_at)),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TimeEntry {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            task_id: row.get("task_id")?,
            start_time: codec::datetime_column(row, "start_time")?,
            end_time: codec::opt_datetime_column(row, "end_time")?,
            duration_minutes: row.get("duration_minutes")?,
            description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
            category: row.get::<_, Option<String>>("category")?.unwrap_or_default(),
            entry_type: codec::enum_column(row, "entry_type")?,
            billable: row.get::<_, Option<bool>>("billable")?.unwrap_or(false),
            tags: codec::json_column(row, "tags")?,
            metadata: codec::metadata_column(row, "metadata")?,
            created_at: codec::datetime_column(row, "created_at")?,
            updated_at: codec::datetime_column(row, "updated_at")?,
        })
    }

    fn patch_columns(patch: &TimeEntryUpdate) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = Vec::new();
        if let Some(user_id) = &patch.user_id {
            columns.push(("user_id", codec::opt_text(user_id.clone())));
        }
        if let Some(task_id) = &patch.task_id {
            columns.push(("task_id", codec::opt_text(task_id.clone())));
        }
        if let Some(start) = &patch.start_time {
            columns.push(("start_time", codec::datetime(start)));
        }
        if let Some(end) = &patch.end_time {
            columns.push(("end_time", codec::opt_datetime(end.as_ref())));
        }
        if let Some(duration) = patch.duration_minutes {
            columns.push(("duration_minutes", codec::opt_int(duration)));
        }
        if let Some(description) = &patch.description {
            columns.push(("description", codec::text(description.as_str())));
        }
        if let Some(category) = &patch.category {
            columns.push(("category", codec::text(category.as_str())));
        }
        if let Some(entry_type) = patch.entry_type {
            columns.push(("entry_type", codec::text(entry_type.as_str())));
        }
        if let Some(billable) = patch.billable {
            columns.push(("billable", Value::Integer(i64::from(billable))));
        }
        if let Some(tags) = &patch.tags {
            columns.push(("tags", codec::json(tags)?));
        }
        if let Some(metadata) = &patch.metadata {
            columns.push(("metadata", codec::metadata(metadata)?));
        }
        Ok(columns)
    }

    fn validate(&self) -> Result<()> {
        if self.end_time.is_some_and(|end| end < self.start_time) {
            return Err(StorageError::Validation(
                "time entry ends before it starts".into(),
            ));
        }
        if self.duration_minutes.is_some_and(|m| m < 0) {
            return Err(StorageError::Validation(
                "time entry duration must not be negative".into(),
            ));
        }
        Ok(())
    }

    fn write_children(&self, db: &Database) -> Result<()> {
        replace_tags(db, "time_entry_tags", "time_entry_id", &self.id, &self.tags)
    }
}

/// Summed minutes for one group of time entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurationTotal {
    pub key: String,
    pub total_minutes: i64,
    pub entries: i64,
}

pub struct TimeEntryRepository {
    repo: Repository<TimeEntry>,
}

impl TimeEntryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: Repository::new(db),
        }
    }

    delegate_repository!(TimeEntry);

    /// Filter selecting entries that start within `[start, end]`.
    pub fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> Filter {
        Filter::new().range(
            "start_time",
            Some(codec::datetime(&start)),
            Some(codec::datetime(&end)),
        )
    }

    /// Update an entry. When the start or end moves and no duration is
    /// given, the duration is recomputed from the resulting bounds.
    pub fn update(&self, id: &str, patch: &TimeEntryUpdate) -> Result<Option<TimeEntry>> {
        let patch = self.with_derived_duration(id, patch)?;
        self.repo.update(id, &patch)
    }

    pub fn update_many(&self, items: &[(String, TimeEntryUpdate)]) -> Result<Vec<TimeEntry>> {
        let mut derived = Vec::with_capacity(items.len());
        for (id, patch) in items {
            derived.push((id.clone(), self.with_derived_duration(id, patch)?));
        }
        self.repo.update_many(&derived)
    }

    /// Close a running entry at `end` and record its duration.
    pub fn stop(&self, id: &str, end: DateTime<Utc>) -> Result<TimeEntry> {
        let entry = self.repo.require(id)?;
        if !entry.is_running() {
            return Err(StorageError::Validation(format!(
                "time entry {} is already stopped",
                id
            )));
        }
        self.repo.update_existing(
            id,
            &TimeEntryUpdate {
                end_time: Some(Some(end)),
                duration_minutes: Some(Some(minutes_between(entry.start_time, end))),
                ..TimeEntryUpdate::default()
            },
        )
    }

    pub fn find_by_task(&self, task_id: &str) -> Result<Vec<TimeEntry>> {
        self.repo.find_all(
            &Filter::new()
                .eq_text("task_id", task_id)
                .order_by("start_time", SortDirection::Asc),
        )
    }

    pub fn find_by_user(&self, user_id: &str) -> Result<Vec<TimeEntry>> {
        self.repo.find_all(
            &Filter::new()
                .eq_text("user_id", user_id)
                .order_by("start_time", SortDirection::Desc),
        )
    }

    pub fn find_by_category(&self, category: &str) -> Result<Vec<TimeEntry>> {
        self.repo
            .find_all(&Filter::new().eq_text("category", category))
    }

    pub fn find_by_tag(&self, tag: &str) -> Result<Vec<TimeEntry>> {
        self.repo.find_all(&Filter::new().contains("tags", tag))
    }

    /// Entries starting within `[start, end]`, earliest first.
    pub fn find_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<TimeEntry>> {
        self.repo.find_all(
            &Self::window(start, end).order_by("start_time", SortDirection::Asc),
        )
    }

    /// Entries without an end time, most recently started first.
    pub fn find_running(&self) -> Result<Vec<TimeEntry>> {
        self.repo.find_all(
            &Filter::new()
                .is_null("end_time")
                .order_by("start_time", SortDirection::Desc),
        )
    }

    pub fn duration_by_category(&self, filter: &Filter) -> Result<Vec<DurationTotal>> {
        self.duration_by("category", filter)
    }

    /// Totals per task; entries without a task are left out.
    pub fn duration_by_task(&self, filter: &Filter) -> Result<Vec<DurationTotal>> {
        let filter = filter.predicates_only().is_not_null("task_id");
        self.duration_by("task_id", &filter)
    }

    /// Totals per UTC calendar day (`YYYY-MM-DD`) of the start time.
    pub fn duration_by_day(&self, filter: &Filter) -> Result<Vec<DurationTotal>> {
        self.duration_by("substr(start_time, 1, 10)", filter)
    }

    fn duration_by(&self, key_expr: &str, filter: &Filter) -> Result<Vec<DurationTotal>> {
        let compiled = compile(&filter.predicates_only(), TIME_ENTRY_COLUMNS)?;
        let head = format!(
            "SELECT {} AS group_key, COALESCE(SUM(duration_minutes), 0), COUNT(*) FROM time_entries",
            key_expr
        );
        let sql = format!("{} GROUP BY group_key ORDER BY group_key", compiled.apply_to(&head));
        self.repo.db().all(&sql, &compiled.params, |row| {
            Ok(DurationTotal {
                key: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                total_minutes: row.get(1)?,
                entries: row.get(2)?,
            })
        })
    }

    fn with_derived_duration(&self, id: &str, patch: &TimeEntryUpdate) -> Result<TimeEntryUpdate> {
        let moves_bounds = patch.start_time.is_some() || patch.end_time.is_some();
        if !moves_bounds || patch.duration_minutes.is_some() {
            return Ok(patch.clone());
        }
        let Some(current) = self.repo.find_by_id(id)? else {
            return Ok(patch.clone());
        };
        let start = patch.start_time.unwrap_or(current.start_time);
        let end = patch.end_time.unwrap_or(current.end_time);
        let mut patch = patch.clone();
        patch.duration_minutes = Some(end.map(|end| minutes_between(start, end)));
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use taskmind_core::types::NewTask;

    use crate::migrations::Migrator;
    use crate::tasks::TaskRepository;

    fn make_db() -> Arc<Database> {
        let db = Arc::new(Database::in_memory());
        Migrator::new(db.clone()).migrate_up().unwrap();
        db
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn entry(category: &str, start: DateTime<Utc>, minutes: i64) -> NewTimeEntry {
        let mut draft = NewTimeEntry::new(category, start);
        draft.end_time = Some(start + Duration::minutes(minutes));
        draft
    }

    #[test]
    fn test_duration_derived_on_create() {
        let repo = TimeEntryRepository::new(make_db());
        let created = repo.create(entry("dev", at(1, 9), 95)).unwrap();
        assert_eq!(created.duration_minutes, Some(95));
        assert_eq!(repo.find_by_id(&created.id).unwrap().unwrap(), created);
    }

    #[test]
    fn test_end_before_start_rejected() {
        let repo = TimeEntryRepository::new(make_db());
        let mut draft = NewTimeEntry::new("dev", at(1, 9));
        draft.end_time = Some(at(1, 8));
        assert!(matches!(
            repo.create(draft),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn test_running_and_stop() {
        let repo = TimeEntryRepository::new(make_db());
        let running = repo.create(NewTimeEntry::new("dev", at(2, 9))).unwrap();
        repo.create(entry("dev", at(1, 9), 30)).unwrap();

        let found = repo.find_running().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);

        let stopped = repo.stop(&running.id, at(2, 11)).unwrap();
        assert_eq!(stopped.duration_minutes, Some(120));
        assert!(!stopped.is_running());
        assert!(repo.find_running().unwrap().is_empty());
        assert!(repo.stop(&running.id, at(2, 12)).is_err());
    }

    #[test]
    fn test_update_recomputes_duration() {
        let repo = TimeEntryRepository::new(make_db());
        let created = repo.create(entry("dev", at(1, 9), 60)).unwrap();
        let updated = repo
            .update(
                &created.id,
                &TimeEntryUpdate {
                    end_time: Some(Some(at(1, 12))),
                    ..TimeEntryUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.duration_minutes, Some(180));
    }

    #[test]
    fn test_find_in_range_and_tag() {
        let repo = TimeEntryRepository::new(make_db());
        let mut tagged = entry("meetings", at(3, 10), 15);
        tagged.tags = vec!["standup".into()];
        repo.create(tagged).unwrap();
        repo.create(entry("dev", at(1, 10), 15)).unwrap();
        repo.create(entry("dev", at(5, 10), 15)).unwrap();

        let in_range = repo.find_in_range(at(2, 0), at(5, 10)).unwrap();
        assert_eq!(in_range.len(), 2);
        assert!(in_range[0].start_time < in_range[1].start_time);
        assert_eq!(repo.find_by_tag("standup").unwrap().len(), 1);
        assert_eq!(repo.find_by_category("dev").unwrap().len(), 2);
    }

    #[test]
    fn test_duration_aggregates() {
        let db = make_db();
        let tasks = TaskRepository::new(db.clone());
        let task = tasks.create(NewTask::new("Billing")).unwrap();
        let repo = TimeEntryRepository::new(db);

        let mut a = entry("dev", at(1, 9), 60);
        a.task_id = Some(task.id.clone());
        repo.create(a).unwrap();
        repo.create(entry("dev", at(1, 14), 30)).unwrap();
        repo.create(entry("review", at(2, 9), 45)).unwrap();

        let by_category = repo.duration_by_category(&Filter::new()).unwrap();
        assert_eq!(
            by_category,
            vec![
                DurationTotal {
                    key: "dev".into(),
                    total_minutes: 90,
                    entries: 2
                },
                DurationTotal {
                    key: "review".into(),
                    total_minutes: 45,
                    entries: 1
                },
            ]
        );

        let by_day = repo.duration_by_day(&Filter::new()).unwrap();
        assert_eq!(by_day[0].key, "2024-03-01");
        assert_eq!(by_day[0].total_minutes, 90);
        assert_eq!(by_day[1].key, "2024-03-02");

        let by_task = repo.duration_by_task(&Filter::new()).unwrap();
        assert_eq!(by_task.len(), 1);
        assert_eq!(by_task[0].key, task.id);

        let windowed = repo
            .duration_by_category(&TimeEntryRepository::window(at(2, 0), at(3, 0)))
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].key, "review");
    }

    #[test]
    fn test_deleting_task_detaches_entries() {
        let db = make_db();
        let tasks = TaskRepository::new(db.clone());
        let task = tasks.create(NewTask::new("Temp")).unwrap();
        let repo = TimeEntryRepository::new(db);
        let mut draft = entry("dev", at(1, 9), 10);
        draft.task_id = Some(task.id.clone());
        let created = repo.create(draft).unwrap();

        assert!(tasks.delete(&task.id).unwrap());
        let reloaded = repo.find_by_id(&created.id).unwrap().unwrap();
        assert_eq!(reloaded.task_id, None);
    }
}
