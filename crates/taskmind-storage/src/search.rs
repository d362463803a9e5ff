//! Full-text search over memories using SQLite FTS5.
//!
//! Queries run against the `memory_fts` virtual table (content and context
//! columns of `memories`) and are ranked by BM25.

use std::sync::Arc;

use rusqlite::types::Value;
use taskmind_core::types::Memory;

use crate::codec;
use crate::db::Database;
use crate::error::Result;
use crate::repository::Entity;

/// A memory matched by a full-text query.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub memory: Memory,
    /// BM25 relevance, negated so that higher is more relevant.
    pub rank: f64,
}

/// Reduce free text to a safe FTS5 query: every word becomes a quoted term
/// and the terms are ANDed. Returns an empty string when nothing is left.
pub fn sanitize_fts5_query(raw: &str) -> String {
    raw.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct FtsSearch {
    db: Arc<Database>,
}

impl FtsSearch {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Memories matching every word of `query`, best match first.
    ///
    /// The query is sanitized first, so FTS5 operators typed by a user are
    /// treated as plain words.
    pub fn search(&self, query: &str, limit: u64) -> Result<Vec<FtsHit>> {
        let fts_query = sanitize_fts5_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let columns = Memory::COLUMNS
            .iter()
            .map(|column| format!("m.{}", column))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {}, memory_fts.rank AS fts_rank
             FROM memory_fts
             JOIN memories m ON m.rowid = memory_fts.rowid
             WHERE memory_fts MATCH ?
             ORDER BY memory_fts.rank
             LIMIT ?",
            columns
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db.all(
            &sql,
            &[codec::text(fts_query), Value::Integer(limit)],
            |row| {
                Ok(FtsHit {
                    memory: Memory::from_row(row)?,
                    // FTS5 rank is negative (lower = better), negate for consistency.
                    rank: -row.get::<_, f64>("fts_rank")?,
                })
            },
        )
    }

    /// Number of memories matching `query`.
    pub fn count_matches(&self, query: &str) -> Result<i64> {
        let fts_query = sanitize_fts5_query(query);
        if fts_query.is_empty() {
            return Ok(0);
        }
        let count = self.db.get(
            "SELECT COUNT(*) FROM memory_fts WHERE memory_fts MATCH ?",
            &[codec::text(fts_query)],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memories::MemoryRepository;
    use crate::migrations::Migrator;
    use taskmind_core::types::{MemoryType, NewMemory};

    fn make_db() -> Arc<Database> {
        let db = Arc::new(Database::in_memory());
        Migrator::new(db.clone()).migrate_up().unwrap();
        db
    }

    fn remember(db: &Arc<Database>, content: &str, context: &str) -> Memory {
        let mut draft = NewMemory::new(MemoryType::Fact, content);
        draft.context = context.to_string();
        MemoryRepository::new(db.clone()).create(draft).unwrap()
    }

    #[test]
    fn test_sanitize_quotes_terms() {
        assert_eq!(sanitize_fts5_query("deploy NEAR(x)"), "\"deploy\" \"NEAR\" \"x\"");
        assert_eq!(sanitize_fts5_query("\"*:^"), "");
        assert_eq!(sanitize_fts5_query("rust_lang 2024"), "\"rust_lang\" \"2024\"");
    }

    #[test]
    fn test_basic_search() {
        let db = make_db();
        let hit = remember(&db, "hello world from the browser", "web");
        remember(&db, "meeting about project status", "work");

        let results = FtsSearch::new(db).search("hello", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory, hit);
    }

    #[test]
    fn test_matches_context_column() {
        let db = make_db();
        remember(&db, "quarterly numbers", "finance");
        let search = FtsSearch::new(db);
        assert_eq!(search.count_matches("finance").unwrap(), 1);
    }

    #[test]
    fn test_operators_are_plain_words() {
        let db = make_db();
        remember(&db, "alpha OR beta", "");
        remember(&db, "beta only", "");
        let search = FtsSearch::new(db);
        // Without sanitizing, "alpha OR beta" would match both rows.
        assert_eq!(search.count_matches("alpha OR beta").unwrap(), 1);
        assert!(search.search("\"unbalanced", 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_and_limit() {
        let db = make_db();
        for i in 0..5 {
            remember(&db, &format!("rust note {}", i), "");
        }
        let search = FtsSearch::new(db);
        assert!(search.search("   ", 10).unwrap().is_empty());
        assert_eq!(search.count_matches("").unwrap(), 0);
        assert_eq!(search.search("rust", 3).unwrap().len(), 3);
    }

    #[test]
    fn test_rank_ordering() {
        let db = make_db();
        remember(&db, "learning rust basics and many other unrelated words here", "");
        let best = remember(&db, "rust rust rust guide", "");
        let results = FtsSearch::new(db).search("rust", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, best.id);
        assert!(results[0].rank >= results[1].rank);
    }

    #[test]
    fn test_deleted_memory_leaves_index() {
        let db = make_db();
        let m = remember(&db, "ephemeral thought", "");
        let search = FtsSearch::new(db.clone());
        assert_eq!(search.count_matches("ephemeral").unwrap(), 1);
        MemoryRepository::new(db).delete(&m.id).unwrap();
        assert_eq!(search.count_matches("ephemeral").unwrap(), 0);
    }
}
