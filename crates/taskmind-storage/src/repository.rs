//! Generic repository over a single entity table.
//!
//! [`Entity`] describes how a domain type maps onto its table; the
//! [`Repository`] implements CRUD, bulk operations and counting once for
//! every entity on top of [`Database`] and the filter compiler.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use tracing::debug;

use taskmind_core::types::new_id;

use crate::codec;
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::filter::{compile, Filter};

/// A persisted record kind.
///
/// Identity and the `created_at`/`updated_at` columns are owned by the
/// repository: `from_draft` receives them, callers never set them.
pub trait Entity: Sized {
    /// Caller-supplied fields for a new record.
    type Draft;
    /// Partial update; unset fields are left untouched.
    type Patch;

    /// Human-readable name used in errors and logs.
    const NAME: &'static str;
    const TABLE: &'static str;
    /// Every column of `TABLE`, in the order `from_row` reads them. Also the
    /// whitelist for filter columns.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> &str;

    fn from_draft(draft: Self::Draft, id: String, now: DateTime<Utc>) -> Self;

    /// Full column/value list for an INSERT, including `id` and timestamps.
    fn to_row(&self) -> Result<Vec<(&'static str, Value)>>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Columns touched by `patch`. Must not include `id`, `created_at` or
    /// `updated_at`.
    fn patch_columns(patch: &Self::Patch) -> Result<Vec<(&'static str, Value)>>;

    /// Reject field values the table cannot hold.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Rewrite rows in side tables derived from this entity. Runs inside the
    /// same transaction as the row write.
    fn write_children(&self, _db: &Database) -> Result<()> {
        Ok(())
    }
}

/// CRUD and bulk operations for one [`Entity`] table.
pub struct Repository<E: Entity> {
    db: Arc<Database>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new(self.db.clone())
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    fn select_head() -> String {
        format!("SELECT {} FROM {}", E::COLUMNS.join(", "), E::TABLE)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<E>> {
        let sql = format!("{} WHERE id = ?", Self::select_head());
        self.db.get(&sql, &[codec::text(id)], E::from_row)
    }

    /// Every row matching `filter`. Without an ordering the rows come back
    /// in storage order.
    pub fn find_all(&self, filter: &Filter) -> Result<Vec<E>> {
        let compiled = compile(filter, E::COLUMNS)?;
        let sql = compiled.apply_to(&Self::select_head());
        self.db.all(&sql, &compiled.params, E::from_row)
    }

    pub fn find_one(&self, filter: &Filter) -> Result<Option<E>> {
        let filter = filter.clone().limit(1);
        Ok(self.find_all(&filter)?.into_iter().next())
    }

    /// Rows matching a hand-written condition over this table's columns.
    pub fn find_where(&self, condition: &str, params: &[Value]) -> Result<Vec<E>> {
        let sql = format!("{} WHERE {}", Self::select_head(), condition);
        self.db.all(&sql, params, E::from_row)
    }

    /// Number of rows matching the predicates of `filter`. Ordering and
    /// pagination are ignored.
    pub fn count(&self, filter: &Filter) -> Result<i64> {
        let compiled = compile(&filter.predicates_only(), E::COLUMNS)?;
        let sql = compiled.apply_to(&format!("SELECT COUNT(*) FROM {}", E::TABLE));
        let count = self.db.get(&sql, &compiled.params, |row| row.get(0))?;
        Ok(count.unwrap_or(0))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", E::TABLE);
        let found: Option<i64> = self.db.get(&sql, &[codec::text(id)], |row| row.get(0))?;
        Ok(found.is_some())
    }

    /// Assign identity and timestamps, insert, and return the stored entity.
    pub fn create(&self, draft: E::Draft) -> Result<E> {
        let entity = E::from_draft(draft, new_id(), Utc::now());
        entity.validate()?;
        self.db.atomic(|| self.insert(&entity))?;
        debug!(entity = E::NAME, id = entity.id(), "Created");
        Ok(entity)
    }

    /// Apply `patch` and return the re-read entity, or `None` when no row
    /// has this id.
    ///
    /// An empty patch writes nothing and returns the stored entity as is.
    pub fn update(&self, id: &str, patch: &E::Patch) -> Result<Option<E>> {
        let columns = E::patch_columns(patch)?;
        if columns.is_empty() {
            return self.find_by_id(id);
        }
        let entity = self.db.atomic(|| self.apply_patch(id, columns))?;
        if entity.is_some() {
            debug!(entity = E::NAME, id, "Updated");
        }
        Ok(entity)
    }

    /// [`Repository::update`] for callers that need the row to exist; a
    /// miss is [`StorageError::NotFound`].
    pub fn update_existing(&self, id: &str, patch: &E::Patch) -> Result<E> {
        self.update(id, patch)?.ok_or_else(|| self.not_found(id))
    }

    /// Remove a row. Returns whether anything was deleted.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", E::TABLE);
        let result = self.db.run(&sql, &[codec::text(id)])?;
        Ok(result.rows_affected > 0)
    }

    /// Create every draft in one transaction.
    pub fn create_many(&self, drafts: Vec<E::Draft>) -> Result<Vec<E>> {
        let now = Utc::now();
        let entities = drafts
            .into_iter()
            .map(|draft| E::from_draft(draft, new_id(), now))
            .collect::<Vec<_>>();
        for entity in &entities {
            entity.validate()?;
        }
        self.db.atomic(|| {
            for entity in &entities {
                self.insert(entity)?;
            }
            Ok(())
        })?;
        debug!(entity = E::NAME, count = entities.len(), "Created batch");
        Ok(entities)
    }

    /// Apply every `(id, patch)` pair in one transaction. Every id must
    /// exist; the check happens before any write.
    pub fn update_many(&self, items: &[(String, E::Patch)]) -> Result<Vec<E>> {
        let mut planned = Vec::with_capacity(items.len());
        for (id, patch) in items {
            planned.push((id.as_str(), E::patch_columns(patch)?));
        }
        self.db.atomic(|| {
            for (id, _) in &planned {
                if !self.exists(id)? {
                    return Err(self.not_found(id));
                }
            }
            let mut updated = Vec::with_capacity(planned.len());
            for (id, columns) in planned {
                let entity = if columns.is_empty() {
                    self.require(id)?
                } else {
                    self.apply_patch(id, columns)?
                        .ok_or_else(|| self.not_found(id))?
                };
                updated.push(entity);
            }
            Ok(updated)
        })
    }

    /// Delete every id in one transaction and return how many rows went.
    pub fn delete_many(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM {} WHERE id = ?", E::TABLE);
        let removed = self.db.atomic(|| {
            let mut removed = 0;
            for id in ids {
                removed += self.db.run(&sql, &[codec::text(id.as_str())])?.rows_affected;
            }
            Ok(removed)
        })?;
        debug!(entity = E::NAME, removed, "Deleted batch");
        Ok(removed)
    }

    /// Run `f` inside a transaction on this repository's database. Writes
    /// made through any repository inside `f` join it; a second
    /// `transaction` inside `f` is rejected.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.db.transaction(f)
    }

    /// Row counts per distinct non-NULL value of `column`.
    pub fn group_counts(&self, column: &str, filter: &Filter) -> Result<BTreeMap<String, i64>> {
        let filter = filter.predicates_only().is_not_null(column);
        let compiled = compile(&filter, E::COLUMNS)?;
        let sql = format!(
            "{} GROUP BY {}",
            compiled.apply_to(&format!("SELECT {}, COUNT(*) FROM {}", column, E::TABLE)),
            column
        );
        let rows = self.db.all(&sql, &compiled.params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.into_iter().collect())
    }

    /// Mean of a numeric column over matching rows; `None` when no row has a
    /// value.
    pub fn average(&self, column: &str, filter: &Filter) -> Result<Option<f64>> {
        let compiled = compile(&filter.predicates_only(), E::COLUMNS)?;
        if !E::COLUMNS.contains(&column) {
            return Err(StorageError::InvalidFilter(format!(
                "unknown column '{}'",
                column
            )));
        }
        let sql = compiled.apply_to(&format!("SELECT AVG({}) FROM {}", column, E::TABLE));
        let avg = self
            .db
            .get(&sql, &compiled.params, |row| row.get::<_, Option<f64>>(0))?;
        Ok(avg.flatten())
    }

    /// `find_by_id` that treats a miss as an error.
    pub fn require(&self, id: &str) -> Result<E> {
        self.find_by_id(id)?.ok_or_else(|| self.not_found(id))
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::NotFound {
            entity: E::NAME,
            id: id.to_string(),
        }
    }

    fn insert(&self, entity: &E) -> Result<()> {
        let row = entity.to_row()?;
        let names = row.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        let placeholders = vec!["?"; row.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            E::TABLE,
            names.join(", "),
            placeholders
        );
        let params = row.into_iter().map(|(_, value)| value).collect::<Vec<_>>();
        self.db.run(&sql, &params)?;
        entity.write_children(&self.db)
    }

    /// UPDATE, re-read and rewrite side tables. Caller owns the transaction.
    fn apply_patch(&self, id: &str, columns: Vec<(&'static str, Value)>) -> Result<Option<E>> {
        // updated_at never goes below created_at, whatever the clock says.
        let mut assignments = vec!["updated_at = MAX(?, created_at)".to_string()];
        let mut params = vec![codec::datetime(&Utc::now())];
        for (name, value) in columns {
            assignments.push(format!("{} = ?", name));
            params.push(value);
        }
        params.push(codec::text(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            E::TABLE,
            assignments.join(", ")
        );
        if self.db.run(&sql, &params)?.rows_affected == 0 {
            return Ok(None);
        }
        let entity = self
            .find_by_id(id)?
            .ok_or_else(|| StorageError::PostUpdateFetchFailed {
                entity: E::NAME,
                id: id.to_string(),
            })?;
        entity.validate()?;
        entity.write_children(&self.db)?;
        Ok(Some(entity))
    }
}

/// Replace the tag rows of one owner in a `<entity>_tags` side table.
pub(crate) fn replace_tags(
    db: &Database,
    table: &str,
    owner_column: &str,
    owner_id: &str,
    tags: &[String],
) -> Result<()> {
    db.run(
        &format!("DELETE FROM {} WHERE {} = ?", table, owner_column),
        &[codec::text(owner_id)],
    )?;
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}, tag) VALUES (?, ?)",
        table, owner_column
    );
    for tag in tags {
        db.run(&sql, &[codec::text(owner_id), codec::text(tag.as_str())])?;
    }
    Ok(())
}

/// Forward the entity-agnostic operations of an inner `repo: Repository<E>`
/// field. `update` and `update_many` are forwarded only by the `updates` arm
/// so a repository can add its own checks around them.
macro_rules! delegate_repository {
    ($entity:ty) => {
        pub fn repository(&self) -> &$crate::repository::Repository<$entity> {
            &self.repo
        }

        pub fn find_by_id(&self, id: &str) -> $crate::error::Result<Option<$entity>> {
            self.repo.find_by_id(id)
        }

        pub fn find_all(
            &self,
            filter: &$crate::filter::Filter,
        ) -> $crate::error::Result<Vec<$entity>> {
            self.repo.find_all(filter)
        }

        pub fn find_one(
            &self,
            filter: &$crate::filter::Filter,
        ) -> $crate::error::Result<Option<$entity>> {
            self.repo.find_one(filter)
        }

        pub fn count(&self, filter: &$crate::filter::Filter) -> $crate::error::Result<i64> {
            self.repo.count(filter)
        }

        pub fn exists(&self, id: &str) -> $crate::error::Result<bool> {
            self.repo.exists(id)
        }

        pub fn create(
            &self,
            draft: <$entity as $crate::repository::Entity>::Draft,
        ) -> $crate::error::Result<$entity> {
            self.repo.create(draft)
        }

        pub fn create_many(
            &self,
            drafts: Vec<<$entity as $crate::repository::Entity>::Draft>,
        ) -> $crate::error::Result<Vec<$entity>> {
            self.repo.create_many(drafts)
        }

        pub fn delete(&self, id: &str) -> $crate::error::Result<bool> {
            self.repo.delete(id)
        }

        pub fn delete_many(&self, ids: &[String]) -> $crate::error::Result<usize> {
            self.repo.delete_many(ids)
        }

        pub fn transaction<T, F>(&self, f: F) -> $crate::error::Result<T>
        where
            F: FnOnce() -> $crate::error::Result<T>,
        {
            self.repo.transaction(f)
        }
    };
    ($entity:ty, updates) => {
        $crate::repository::delegate_repository!($entity);

        pub fn update(
            &self,
            id: &str,
            patch: &<$entity as $crate::repository::Entity>::Patch,
        ) -> $crate::error::Result<Option<$entity>> {
            self.repo.update(id, patch)
        }

        pub fn update_many(
            &self,
            items: &[(String, <$entity as $crate::repository::Entity>::Patch)],
        ) -> $crate::error::Result<Vec<$entity>> {
            self.repo.update_many(items)
        }
    };
}

pub(crate) use delegate_repository;
