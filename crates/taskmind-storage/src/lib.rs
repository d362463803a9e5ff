//! Taskmind storage crate - SQLite persistence for tasks, time entries,
//! notifications and memories.
//!
//! Provides a lazily opened WAL-mode SQLite database, code-registered
//! migrations, a typed filter compiler, a generic repository and one
//! repository per entity, plus lexical and FTS5 memory search.

pub mod codec;
pub mod db;
pub mod error;
pub mod filter;
pub mod memories;
pub mod migrations;
pub mod notifications;
pub mod repository;
pub mod schema;
pub mod search;
pub mod similarity;
pub mod store;
pub mod tasks;
pub mod time_entries;

pub use db::{Database, RunResult, StorageOptions};
pub use error::{Result, StorageError};
pub use filter::{compile, CompiledFilter, Filter, Predicate, SortDirection};
pub use memories::{
    MemoryQuery, MemoryRepository, MemoryStatistics, RelationshipFilter, ScoredMemory,
    SimilarityOptions, StoredEmbedding,
};
pub use migrations::{MigrationRecord, MigrationStatus, MigrationUnit, Migrator};
pub use notifications::{NotificationRepository, NotificationStatistics};
pub use repository::{Entity, Repository};
pub use search::{sanitize_fts5_query, FtsHit, FtsSearch};
pub use similarity::{jaccard, text_similarity, tokenize};
pub use store::Storage;
pub use tasks::{TaskQuery, TaskRepository, TaskStatistics};
pub use time_entries::{DurationTotal, TimeEntryRepository};
