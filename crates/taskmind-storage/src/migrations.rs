//! Schema migration engine.
//!
//! Migration units are registered in code (see [`crate::schema::registry`]).
//! Each unit has a name with a leading numeric token (`001-initial-schema`)
//! that becomes its id, plus an `up` and a `down` step. Applied ids are kept
//! in the `migrations` ledger table, created on first use.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::codec;
use crate::db::Database;
use crate::error::{Result, StorageError};

/// One schema step. It runs inside the transaction that also records the
/// ledger change, so writes should go through [`Database::atomic`].
pub type MigrationFn = fn(&Database) -> Result<()>;

#[derive(Clone, Copy)]
pub struct MigrationUnit {
    pub name: &'static str,
    pub up: Option<MigrationFn>,
    pub down: Option<MigrationFn>,
}

impl MigrationUnit {
    pub const fn new(name: &'static str, up: MigrationFn, down: MigrationFn) -> Self {
        Self {
            name,
            up: Some(up),
            down: Some(down),
        }
    }

    /// The leading run of ASCII digits in the name, if any.
    pub fn id(&self) -> Option<&'static str> {
        let name = self.name;
        let end = name
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(name.len());
        (end > 0).then(|| &name[..end])
    }
}

impl std::fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("name", &self.name)
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .finish()
    }
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub id: String,
    pub filename: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationStatus {
    /// Ledger entries in ascending id order.
    pub applied: Vec<MigrationRecord>,
    /// Ids of discovered units not yet applied, ascending.
    pub pending: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Discovered {
    id: &'static str,
    name: &'static str,
    up: MigrationFn,
    down: MigrationFn,
}

pub struct Migrator {
    db: Arc<Database>,
    units: Vec<MigrationUnit>,
}

impl Migrator {
    /// Migrator over the built-in schema units.
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_units(db, crate::schema::registry())
    }

    pub fn with_units(db: Arc<Database>, units: Vec<MigrationUnit>) -> Self {
        Self { db, units }
    }

    /// Ids of the well-formed units, in the order they apply.
    pub fn discover(&self) -> Vec<String> {
        self.discovered().iter().map(|u| u.id.to_string()).collect()
    }

    /// Ledger entries in ascending id order.
    pub fn applied(&self) -> Result<Vec<MigrationRecord>> {
        self.ensure_ledger()?;
        self.db.all(
            "SELECT id, filename, applied_at FROM migrations ORDER BY id ASC",
            &[],
            |row| {
                Ok(MigrationRecord {
                    id: row.get("id")?,
                    filename: row.get("filename")?,
                    applied_at: codec::datetime_column(row, "applied_at")?,
                })
            },
        )
    }

    /// Apply every pending unit in ascending id order and return the ids
    /// applied. Stops at the first failing unit.
    pub fn migrate_up(&self) -> Result<Vec<String>> {
        let applied: BTreeSet<String> = self.applied()?.into_iter().map(|r| r.id).collect();
        let pending = self
            .discovered()
            .into_iter()
            .filter(|unit| !applied.contains(unit.id))
            .collect::<Vec<_>>();

        if pending.is_empty() {
            info!("Database schema is up to date");
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(pending.len());
        for unit in pending {
            self.db
                .transaction(|| {
                    (unit.up)(&self.db)?;
                    self.db.run(
                        "INSERT INTO migrations (id, filename, applied_at) VALUES (?, ?, ?)",
                        &[
                            codec::text(unit.id),
                            codec::text(unit.name),
                            codec::datetime(&Utc::now()),
                        ],
                    )?;
                    Ok(())
                })
                .map_err(|e| StorageError::migration(unit.name, e))?;
            info!(id = unit.id, name = unit.name, "Applied migration");
            done.push(unit.id.to_string());
        }
        Ok(done)
    }

    /// Roll back applied units and return the ids rolled back.
    ///
    /// Without a target only the most recently applied unit is rolled back.
    /// With a target every applied unit whose id sorts after it is rolled
    /// back, newest first. Each `down` commits on its own: a failure stops
    /// the batch and leaves earlier rollbacks in place.
    pub fn migrate_down(&self, target: Option<&str>) -> Result<Vec<String>> {
        let applied = self.applied()?;
        if applied.is_empty() {
            info!("No migrations to roll back");
            return Ok(Vec::new());
        }

        let victims: Vec<String> = match target {
            None => applied.last().map(|r| r.id.clone()).into_iter().collect(),
            Some(target) => {
                let known = applied.iter().any(|r| r.id == target)
                    || self.discovered().iter().any(|u| u.id == target);
                if !known {
                    return Err(StorageError::migration(
                        target,
                        StorageError::Validation(format!("unknown migration target '{}'", target)),
                    ));
                }
                applied
                    .iter()
                    .rev()
                    .filter(|r| r.id.as_str() > target)
                    .map(|r| r.id.clone())
                    .collect()
            }
        };

        self.roll_back(&victims)
    }

    /// Roll back every applied unit, newest first.
    pub fn rollback_all(&self) -> Result<Vec<String>> {
        let victims: Vec<String> = self.applied()?.into_iter().rev().map(|r| r.id).collect();
        self.roll_back(&victims)
    }

    /// Applied and pending units. Creates the ledger if absent.
    pub fn status(&self) -> Result<MigrationStatus> {
        let applied = self.applied()?;
        let applied_ids: BTreeSet<&str> = applied.iter().map(|r| r.id.as_str()).collect();
        let pending = self
            .discovered()
            .into_iter()
            .filter(|unit| !applied_ids.contains(unit.id))
            .map(|unit| unit.id.to_string())
            .collect();
        Ok(MigrationStatus { applied, pending })
    }

    fn roll_back(&self, ids: &[String]) -> Result<Vec<String>> {
        let discovered = self.discovered();
        // Resolve every unit up front so an unrunnable batch fails before
        // any schema change.
        let mut plan = Vec::with_capacity(ids.len());
        for id in ids {
            let unit = discovered
                .iter()
                .find(|unit| unit.id == id.as_str())
                .ok_or_else(|| {
                    StorageError::migration(
                        id,
                        StorageError::Validation(format!(
                            "applied migration '{}' has no runnable down step",
                            id
                        )),
                    )
                })?;
            plan.push(*unit);
        }

        let mut done = Vec::with_capacity(plan.len());
        for unit in plan {
            self.db
                .transaction(|| {
                    (unit.down)(&self.db)?;
                    self.db
                        .run("DELETE FROM migrations WHERE id = ?", &[codec::text(unit.id)])?;
                    Ok(())
                })
                .map_err(|e| StorageError::migration(unit.name, e))?;
            info!(id = unit.id, name = unit.name, "Rolled back migration");
            done.push(unit.id.to_string());
        }
        Ok(done)
    }

    fn discovered(&self) -> Vec<Discovered> {
        let mut found: Vec<Discovered> = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let Some(id) = unit.id() else {
                warn!(name = unit.name, "Skipping migration without a numeric prefix");
                continue;
            };
            let (Some(up), Some(down)) = (unit.up, unit.down) else {
                warn!(name = unit.name, "Skipping migration without both up and down steps");
                continue;
            };
            if found.iter().any(|d| d.id == id) {
                warn!(name = unit.name, id, "Skipping migration with duplicate id");
                continue;
            }
            found.push(Discovered {
                id,
                name: unit.name,
                up,
                down,
            });
        }
        found.sort_by(|a, b| a.id.cmp(b.id));
        found
    }

    fn ensure_ledger(&self) -> Result<()> {
        self.db.execute_batch(
            "CREATE TABLE IF NOT EXISTS migrations (
                id          TEXT PRIMARY KEY,
                filename    TEXT NOT NULL,
                applied_at  DATETIME NOT NULL
            );",
        )
    }
}
