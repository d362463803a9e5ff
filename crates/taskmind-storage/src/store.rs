//! One handle bundling the shared database, the migrator and the four
//! entity repositories.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use taskmind_core::config::TaskmindConfig;

use crate::db::{Database, StorageOptions};
use crate::error::Result;
use crate::memories::MemoryRepository;
use crate::migrations::Migrator;
use crate::notifications::NotificationRepository;
use crate::schema::ENTITY_TABLES;
use crate::tasks::TaskRepository;
use crate::time_entries::TimeEntryRepository;

pub struct Storage {
    db: Arc<Database>,
    pub tasks: TaskRepository,
    pub time_entries: TimeEntryRepository,
    pub notifications: NotificationRepository,
    pub memories: MemoryRepository,
}

impl Storage {
    /// Wrap an existing database. No connection is opened and no migration
    /// is run.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            tasks: TaskRepository::new(db.clone()),
            time_entries: TimeEntryRepository::new(db.clone()),
            notifications: NotificationRepository::new(db.clone()),
            memories: MemoryRepository::new(db.clone()),
            db,
        }
    }

    /// Open the database at `path` and bring its schema up to date.
    pub fn open(path: &Path, options: StorageOptions) -> Result<Self> {
        let db = Arc::new(Database::with_options(path, options));
        db.open()?;
        let storage = Self::new(db);
        storage.migrate()?;
        Ok(storage)
    }

    /// Open the database described by `config`.
    pub fn from_config(config: &TaskmindConfig) -> Result<Self> {
        Self::open(&config.database_path(), StorageOptions::from(&config.storage))
    }

    /// Migrated in-memory storage.
    pub fn in_memory() -> Result<Self> {
        let storage = Self::new(Arc::new(Database::in_memory()));
        storage.migrate()?;
        Ok(storage)
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.db.clone())
    }

    /// Apply pending migrations, returning the ids applied.
    pub fn migrate(&self) -> Result<Vec<String>> {
        let applied = self.migrator().migrate_up()?;
        if !applied.is_empty() {
            info!(count = applied.len(), "Schema migrated");
        }
        Ok(applied)
    }

    /// Run `f` as one unit of work. Writes through any repository of this
    /// handle join it and roll back together when `f` fails.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.db.transaction(f)
    }

    /// Row count of every entity table.
    pub fn row_counts(&self) -> Result<BTreeMap<&'static str, i64>> {
        let mut counts = BTreeMap::new();
        for &table in ENTITY_TABLES {
            let count = self
                .db
                .get(&format!("SELECT COUNT(*) FROM {}", table), &[], |row| {
                    row.get::<_, i64>(0)
                })?
                .unwrap_or(0);
            counts.insert(table, count);
        }
        Ok(counts)
    }

    pub fn close(&self) -> Result<()> {
        self.db.close()
    }
}
