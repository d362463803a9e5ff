//! Task persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;

use taskmind_core::lifecycle::validate_task_transition;
use taskmind_core::types::{NewTask, Priority, Task, TaskStatus, TaskType, TaskUpdate};

use crate::codec;
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::filter::{Filter, SortDirection};
use crate::repository::{delegate_repository, replace_tags, Entity, Repository};

const TASK_COLUMNS: &[&str] = &[
    "id",
    "title",
    "description",
    "task_type",
    "status",
    "priority",
    "assignee",
    "project_id",
    "due_date",
    "estimated_minutes",
    "actual_minutes",
    "dependencies",
    "tags",
    "metadata",
    "created_at",
    "updated_at",
];

/// Statuses that no longer count as open work.
const CLOSED_STATUSES: &str = "('COMPLETED', 'CANCELLED')";

impl Entity for Task {
    type Draft = NewTask;
    type Patch = TaskUpdate;

    const NAME: &'static str = "Task";
    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static [&'static str] = TASK_COLUMNS;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_draft(draft: NewTask, id: String, now: DateTime<Utc>) -> Self {
        Task {
            id,
            title: draft.title,
            description: draft.description,
            task_type: draft.task_type,
            status: draft.status,
            priority: draft.priority,
            assignee: draft.assignee,
            project_id: draft.project_id,
            due_date: draft.due_date,
            estimated_minutes: draft.estimated_minutes,
            actual_minutes: None,
            dependencies: draft.dependencies,
            tags: draft.tags,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", codec::text(self.id.as_str())),
            ("title", codec::text(self.title.as_str())),
            ("description", codec::text(self.description.as_str())),
            ("task_type", codec::text(self.task_type.as_str())),
            ("status", codec::text(self.status.as_str())),
            ("priority", codec::text(self.priority.as_str())),
            ("assignee", codec::opt_text(self.assignee.clone())),
            ("project_id", codec::opt_text(self.project_id.clone())),
            ("due_date", codec::opt_datetime(self.due_date.as_ref())),
            ("estimated_minutes", codec::opt_int(self.estimated_minutes)),
            ("actual_minutes", codec::opt_int(self.actual_minutes)),
            ("dependencies", codec::json(&self.dependencies)?),
            ("tags", codec::json(&self.tags)?),
            ("metadata", codec::metadata(&self.metadata)?),
            ("created_at", codec::datetime(&self.created_at)),
            ("updated_at", codec::datetime(&self.updated_at)),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Task {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
            task_type: codec::enum_column(row, "task_type")?,
            status: codec::enum_column(row, "status")?,
            priority: codec::enum_column(row, "priority")?,
            assignee: row.get("assignee")?,
            project_id: row.get("project_id")?,
            due_date: codec::opt_datetime_column(row, "due_date")?,
            estimated_minutes: row.get("estimated_minutes")?,
            actual_minutes: row.get("actual_minutes")?,
            dependencies: codec::json_column(row, "dependencies")?,
            tags: codec::json_column(row, "tags")?,
            metadata: codec::metadata_column(row, "metadata")?,
            created_at: codec::datetime_column(row, "created_at")?,
            updated_at: codec::datetime_column(row, "updated_at")?,
        })
    }

    fn patch_columns(patch: &TaskUpdate) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = Vec::new();
        if let Some(title) = &patch.title {
            columns.push(("title", codec::text(title.as_str())));
        }
        if let Some(description) = &patch.description {
            columns.push(("description", codec::text(description.as_str())));
        }
        if let Some(task_type) = patch.task_type {
            columns.push(("task_type", codec::text(task_type.as_str())));
        }
        if let Some(status) = patch.status {
            columns.push(("status", codec::text(status.as_str())));
        }
        if let Some(priority) = patch.priority {
            columns.push(("priority", codec::text(priority.as_str())));
        }
        if let Some(assignee) = &patch.assignee {
            columns.push(("assignee", codec::opt_text(assignee.clone())));
        }
        if let Some(project_id) = &patch.project_id {
            columns.push(("project_id", codec::opt_text(project_id.clone())));
        }
        if let Some(due_date) = &patch.due_date {
            columns.push(("due_date", codec::opt_datetime(due_date.as_ref())));
        }
        if let Some(estimated) = patch.estimated_minutes {
            columns.push(("estimated_minutes", codec::opt_int(estimated)));
        }
        if let Some(actual) = patch.actual_minutes {
            columns.push(("actual_minutes", codec::opt_int(actual)));
        }
        if let Some(dependencies) = &patch.dependencies {
            columns.push(("dependencies", codec::json(dependencies)?));
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
        if self.title.trim().is_empty() {
            return Err(StorageError::Validation("task title must not be empty".into()));
        }
        if self.estimated_minutes.is_some_and(|m| m < 0)
            || self.actual_minutes.is_some_and(|m| m < 0)
        {
            return Err(StorageError::Validation(
                "task minutes must not be negative".into(),
            ));
        }
        if self.dependencies.iter().any(|dep| dep == &self.id) {
            return Err(StorageError::Validation(
                "a task cannot depend on itself".into(),
            ));
        }
        Ok(())
    }

    fn write_children(&self, db: &Database) -> Result<()> {
        replace_tags(db, "task_tags", "task_id", &self.id, &self.tags)
    }
}

/// Structured task lookup. Every set field is ANDed; `filter` carries
/// extra predicates plus ordering and pagination.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub task_type: Option<TaskType>,
    pub assignee: Option<String>,
    pub project_id: Option<String>,
    pub tag: Option<String>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    /// Substring of the title or description.
    pub text: Option<String>,
    pub filter: Filter,
}

impl TaskQuery {
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(status) = self.status {
            filter = filter.eq_text("status", status.as_str());
        }
        if let Some(priority) = self.priority {
            filter = filter.eq_text("priority", priority.as_str());
        }
        if let Some(task_type) = self.task_type {
            filter = filter.eq_text("task_type", task_type.as_str());
        }
        if let Some(assignee) = &self.assignee {
            filter = filter.eq_text("assignee", assignee.as_str());
        }
        if let Some(project_id) = &self.project_id {
            filter = filter.eq_text("project_id", project_id.as_str());
        }
        if let Some(tag) = &self.tag {
            filter = filter.contains("tags", tag.as_str());
        }
        if self.due_after.is_some() || self.due_before.is_some() {
            filter = filter.range(
                "due_date",
                self.due_after.as_ref().map(codec::datetime),
                self.due_before.as_ref().map(codec::datetime),
            );
        }
        if let Some(text) = &self.text {
            filter = filter.like(&["title", "description"], text.as_str());
        }
        filter.merge(self.filter.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStatistics {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub average_estimated_minutes: Option<f64>,
    pub overdue: i64,
}

pub struct TaskRepository {
    repo: Repository<Task>,
}

impl TaskRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: Repository::new(db),
        }
    }

    delegate_repository!(Task);

    /// Update a task. A status change must be a legal transition from the
    /// stored status; an illegal one fails before anything is written.
    /// Returns `None` when no task has `id`.
    pub fn update(&self, id: &str, patch: &TaskUpdate) -> Result<Option<Task>> {
        if let Some(next) = patch.status {
            let Some(current) = self.repo.find_by_id(id)? else {
                return Ok(None);
            };
            validate_task_transition(current.status, next)?;
        }
        self.repo.update(id, patch)
    }

    /// Batch form of [`TaskRepository::update`]. Every transition is checked
    /// before the batch starts.
    pub fn update_many(&self, items: &[(String, TaskUpdate)]) -> Result<Vec<Task>> {
        for (id, patch) in items {
            if let Some(next) = patch.status {
                if let Some(current) = self.repo.find_by_id(id)? {
                    validate_task_transition(current.status, next)?;
                }
            }
        }
        self.repo.update_many(items)
    }

    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let current = self.repo.require(id)?;
        validate_task_transition(current.status, status)?;
        if current.status == status {
            return Ok(current);
        }
        self.repo.update_existing(
            id,
            &TaskUpdate {
                status: Some(status),
                ..TaskUpdate::default()
            },
        )
    }

    pub fn find(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        self.repo.find_all(&query.to_filter())
    }

    pub fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.find(&TaskQuery {
            status: Some(status),
            ..TaskQuery::default()
        })
    }

    pub fn find_by_assignee(&self, assignee: &str) -> Result<Vec<Task>> {
        self.find(&TaskQuery {
            assignee: Some(assignee.to_string()),
            ..TaskQuery::default()
        })
    }

    pub fn find_by_project(&self, project_id: &str) -> Result<Vec<Task>> {
        self.find(&TaskQuery {
            project_id: Some(project_id.to_string()),
            ..TaskQuery::default()
        })
    }

    pub fn find_by_tag(&self, tag: &str) -> Result<Vec<Task>> {
        self.find(&TaskQuery {
            tag: Some(tag.to_string()),
            ..TaskQuery::default()
        })
    }

    /// Tasks due within `[start, end]`, soonest first.
    pub fn find_due_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Task>> {
        self.find(&TaskQuery {
            due_after: Some(start),
            due_before: Some(end),
            filter: Filter::new().order_by("due_date", SortDirection::Asc),
            ..TaskQuery::default()
        })
    }

    /// Open tasks whose due date is before `now`, most overdue first.
    pub fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        self.repo.find_where(
            &format!(
                "due_date < ? AND status NOT IN {} ORDER BY due_date ASC",
                CLOSED_STATUSES
            ),
            &[codec::datetime(&now)],
        )
    }

    /// Tasks whose title or description contains `term`.
    pub fn search_text(&self, term: &str) -> Result<Vec<Task>> {
        self.find(&TaskQuery {
            text: Some(term.to_string()),
            ..TaskQuery::default()
        })
    }

    /// Make `id` depend on `dependency_id`. Both tasks must exist.
    pub fn add_dependency(&self, id: &str, dependency_id: &str) -> Result<Task> {
        if id == dependency_id {
            return Err(StorageError::Validation(
                "a task cannot depend on itself".into(),
            ));
        }
        let task = self.repo.require(id)?;
        if !self.repo.exists(dependency_id)? {
            return Err(StorageError::NotFound {
                entity: Task::NAME,
                id: dependency_id.to_string(),
            });
        }
        if task.dependencies.iter().any(|dep| dep == dependency_id) {
            return Ok(task);
        }
        let mut dependencies = task.dependencies;
        dependencies.push(dependency_id.to_string());
        self.repo.update_existing(
            id,
            &TaskUpdate {
                dependencies: Some(dependencies),
                ..TaskUpdate::default()
            },
        )
    }

    pub fn remove_dependency(&self, id: &str, dependency_id: &str) -> Result<Task> {
        let task = self.repo.require(id)?;
        if !task.dependencies.iter().any(|dep| dep == dependency_id) {
            return Ok(task);
        }
        let dependencies = task
            .dependencies
            .into_iter()
            .filter(|dep| dep != dependency_id)
            .collect();
        self.repo.update_existing(
            id,
            &TaskUpdate {
                dependencies: Some(dependencies),
                ..TaskUpdate::default()
            },
        )
    }

    /// Counts and averages over the tasks matching `filter`.
    pub fn statistics(&self, filter: &Filter, now: DateTime<Utc>) -> Result<TaskStatistics> {
        let compiled = crate::filter::compile(&filter.predicates_only(), TASK_COLUMNS)?;
        let mut conditions = compiled.conditions.clone();
        conditions.push("due_date < ?".to_string());
        conditions.push(format!("status NOT IN {}", CLOSED_STATUSES));
        let mut params = compiled.params.clone();
        params.push(codec::datetime(&now));
        let overdue = self
            .repo
            .db()
            .get(
                &format!(
                    "SELECT COUNT(*) FROM tasks WHERE {}",
                    conditions.join(" AND ")
                ),
                &params,
                |row| row.get::<_, i64>(0),
            )?
            .unwrap_or(0);

        Ok(TaskStatistics {
            total: self.repo.count(filter)?,
            by_status: self.repo.group_counts("status", filter)?,
            by_priority: self.repo.group_counts("priority", filter)?,
            by_type: self.repo.group_counts("task_type", filter)?,
            average_estimated_minutes: self.repo.average("estimated_minutes", filter)?,
            overdue,
        })
    }
}
