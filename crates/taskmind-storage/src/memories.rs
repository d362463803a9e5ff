//! Memory persistence, structured search and lexical recall.
//!
//! Besides the usual CRUD this repository offers three ways to look up
//! memories:
//! - [`MemoryRepository::search`]: structured filters, with relationship
//!   filters applied in process after the SQL query.
//! - [`MemoryRepository::find_similar`]: token-set Jaccard ranking of
//!   candidate contents against a query text.
//! - [`MemoryRepository::full_text_search`]: FTS5 over content and context.
//!
//! Embedding blobs can be stored and read back, but nothing here computes
//! or compares embeddings.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;
use tracing::debug;

use taskmind_core::config::MemoryConfig;
use taskmind_core::types::{
    Memory, MemoryRelationship, MemoryType, MemoryUpdate, NewMemory, RelationType,
};

use crate::codec;
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::filter::{Filter, SortDirection};
use crate::repository::{delegate_repository, replace_tags, Entity, Repository};
use crate::search::FtsSearch;
use crate::similarity::{jaccard, tokenize};

const MEMORY_COLUMNS: &[&str] = &[
    "id",
    "memory_type",
    "content",
    "context",
    "importance",
    "confidence",
    "timestamp",
    "access_count",
    "last_accessed",
    "source",
    "tags",
    "relationships",
    "metadata",
    "created_at",
    "updated_at",
];

fn check_unit_interval(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(StorageError::Validation(format!(
            "{} must be within [0, 1], got {}",
            field, value
        )))
    }
}

impl Entity for Memory {
    type Draft = NewMemory;
    type Patch = MemoryUpdate;

    const NAME: &'static str = "Memory";
    const TABLE: &'static str = "memories";
    const COLUMNS: &'static [&'static str] = MEMORY_COLUMNS;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_draft(draft: NewMemory, id: String, now: DateTime<Utc>) -> Self {
        Memory {
            id,
            memory_type: draft.memory_type,
            content: draft.content,
            context: draft.context,
            importance: draft.importance,
            confidence: draft.confidence,
            timestamp: draft.timestamp.unwrap_or(now),
            access_count: 0,
            last_accessed: None,
            source: draft.source,
            tags: draft.tags,
            relationships: draft.relationships,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", codec::text(self.id.as_str())),
            ("memory_type", codec::text(self.memory_type.as_str())),
            ("content", codec::text(self.content.as_str())),
            ("context", codec::text(self.context.as_str())),
            ("importance", Value::Real(self.importance)),
            ("confidence", Value::Real(self.confidence)),
            ("timestamp", codec::datetime(&self.timestamp)),
            ("access_count", Value::Integer(self.access_count)),
            ("last_accessed", codec::opt_datetime(self.last_accessed.as_ref())),
            ("source", codec::opt_text(self.source.clone())),
            ("tags", codec::json(&self.tags)?),
            ("relationships", codec::json(&self.relationships)?),
            ("metadata", codec::metadata(&self.metadata)?),
            ("created_at", codec::datetime(&self.created_at)),
            ("updated_at", codec::datetime(&self.updated_at)),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Memory {
            id: row.get("id")?,
            memory_type: codec::enum_column(row, "memory_type")?,
            content: row.get("content")?,
            context: row.get::<_, Option<String>>("context")?.unwrap_or_default(),
            importance: row
                .get::<_, Option<f64>>("importance")?
                .unwrap_or(taskmind_core::types::DEFAULT_IMPORTANCE),
            confidence: row
                .get::<_, Option<f64>>("confidence")?
                .unwrap_or(taskmind_core::types::DEFAULT_CONFIDENCE),
            timestamp: codec::datetime_column(row, "timestamp")?,
            access_count: row.get::<_, Option<i64>>("access_count")?.unwrap_or(0),
            last_accessed: codec::opt_datetime_column(row, "last_accessed")?,
            source: row.get("source")?,
            tags: codec::json_column(row, "tags")?,
            relationships: codec::json_column(row, "relationships")?,
            metadata: codec::metadata_column(row, "metadata")?,
            created_at: codec::datetime_column(row, "created_at")?,
            updated_at: codec::datetime_column(row, "updated_at")?,
        })
    }

    fn patch_columns(patch: &MemoryUpdate) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = Vec::new();
        if let Some(memory_type) = patch.memory_type {
            columns.push(("memory_type", codec::text(memory_type.as_str())));
        }
        if let Some(content) = &patch.content {
            columns.push(("content", codec::text(content.as_str())));
        }
        if let Some(context) = &patch.context {
            columns.push(("context", codec::text(context.as_str())));
        }
        if let Some(importance) = patch.importance {
            check_unit_interval("importance", importance)?;
            columns.push(("importance", Value::Real(importance)));
        }
        if let Some(confidence) = patch.confidence {
            check_unit_interval("confidence", confidence)?;
            columns.push(("confidence", Value::Real(confidence)));
        }
        if let Some(source) = &patch.source {
            columns.push(("source", codec::opt_text(source.clone())));
        }
        if let Some(tags) = &patch.tags {
            columns.push(("tags", codec::json(tags)?));
        }
        if let Some(relationships) = &patch.relationships {
            columns.push(("relationships", codec::json(relationships)?));
        }
        if let Some(metadata) = &patch.metadata {
            columns.push(("metadata", codec::metadata(metadata)?));
        }
        Ok(columns)
    }

    fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(StorageError::Validation(
                "memory content must not be empty".into(),
            ));
        }
        check_unit_interval("importance", self.importance)?;
        check_unit_interval("confidence", self.confidence)?;
        for relationship in &self.relationships {
            check_unit_interval("relationship strength", relationship.strength)?;
        }
        Ok(())
    }

    fn write_children(&self, db: &Database) -> Result<()> {
        replace_tags(db, "memory_tags", "memory_id", &self.id, &self.tags)
    }
}

/// Keep memories with an outgoing edge of `relation_type`, optionally to
/// one specific target.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipFilter {
    pub relation_type: RelationType,
    pub target_id: Option<String>,
}

impl RelationshipFilter {
    fn matches(&self, memory: &Memory) -> bool {
        memory.relationships.iter().any(|edge| {
            edge.relation_type == self.relation_type
                && self
                    .target_id
                    .as_deref()
                    .map_or(true, |target| edge.target_id == target)
        })
    }
}

/// Structured memory lookup. Every set field is ANDed.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub memory_type: Option<MemoryType>,
    pub context: Option<String>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_importance: Option<f64>,
    pub max_importance: Option<f64>,
    pub min_confidence: Option<f64>,
    /// Substring of the content or context.
    pub text: Option<String>,
    pub relationship: Option<RelationshipFilter>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl MemoryQuery {
    /// SQL-side part of the query. Pagination is left out when a
    /// relationship filter has to run first.
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(memory_type) = self.memory_type {
            filter = filter.eq_text("memory_type", memory_type.as_str());
        }
        if let Some(context) = &self.context {
            filter = filter.eq_text("context", context.as_str());
        }
        for tag in &self.tags {
            filter = filter.contains("tags", tag.as_str());
        }
        if let Some(source) = &self.source {
            filter = filter.eq_text("source", source.as_str());
        }
        if self.since.is_some() || self.until.is_some() {
            filter = filter.range(
                "timestamp",
                self.since.as_ref().map(codec::datetime),
                self.until.as_ref().map(codec::datetime),
            );
        }
        if self.min_importance.is_some() || self.max_importance.is_some() {
            filter = filter.range(
                "importance",
                self.min_importance.map(Value::Real),
                self.max_importance.map(Value::Real),
            );
        }
        if let Some(min) = self.min_confidence {
            filter = filter.range("confidence", Some(Value::Real(min)), None);
        }
        if let Some(text) = &self.text {
            filter = filter.like(&["content", "context"], text.as_str());
        }
        if let Some((column, direction)) = &self.order_by {
            filter = filter.order_by(column.as_str(), *direction);
        }
        if self.relationship.is_none() {
            if let Some(limit) = self.limit {
                filter = filter.limit(limit);
            }
            if let Some(offset) = self.offset {
                filter = filter.offset(offset);
            }
        }
        filter
    }
}

/// Tuning for [`MemoryRepository::find_similar`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityOptions {
    /// Only consider memories with exactly this context.
    pub context: Option<String>,
    /// Minimum Jaccard similarity to keep a candidate.
    pub threshold: f64,
    pub limit: usize,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            context: None,
            threshold: 0.5,
            limit: 10,
        }
    }
}

impl From<&MemoryConfig> for SimilarityOptions {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            context: None,
            threshold: config.similarity_threshold,
            limit: config.similarity_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f64,
}

/// An embedding vector as stored in `memory_embeddings`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub memory_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStatistics {
    pub total: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_context: BTreeMap<String, i64>,
    pub average_importance: Option<f64>,
    pub average_confidence: Option<f64>,
    pub total_accesses: i64,
}

pub struct MemoryRepository {
    repo: Repository<Memory>,
    fts: FtsSearch,
}

impl MemoryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            fts: FtsSearch::new(db.clone()),
            repo: Repository::new(db),
        }
    }

    delegate_repository!(Memory, updates);

    pub fn search(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        let candidates = self.repo.find_all(&query.to_filter())?;
        let Some(relationship) = &query.relationship else {
            return Ok(candidates);
        };
        let offset = query.offset.filter(|_| query.limit.is_some()).unwrap_or(0);
        let limit = query.limit.unwrap_or(u64::MAX);
        Ok(candidates
            .into_iter()
            .filter(|memory| relationship.matches(memory))
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    /// Memories whose content shares enough words with `content`, most
    /// similar first. Ties are broken by id so the order is stable.
    pub fn find_similar(
        &self,
        content: &str,
        options: &SimilarityOptions,
    ) -> Result<Vec<ScoredMemory>> {
        let mut filter = Filter::new();
        if let Some(context) = &options.context {
            filter = filter.eq_text("context", context.as_str());
        }
        let query_tokens = tokenize(content);
        let candidates = self.repo.find_all(&filter)?;
        let examined = candidates.len();

        let mut scored = candidates
            .into_iter()
            .filter_map(|memory| {
                let similarity = jaccard(&query_tokens, &tokenize(&memory.content));
                (similarity >= options.threshold).then_some(ScoredMemory { memory, similarity })
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        scored.truncate(options.limit);

        debug!(examined, matched = scored.len(), "Lexical similarity search");
        Ok(scored)
    }

    /// FTS5 search over content and context, best match first.
    pub fn full_text_search(&self, query: &str, limit: u64) -> Result<Vec<Memory>> {
        Ok(self
            .fts
            .search(query, limit)?
            .into_iter()
            .map(|hit| hit.memory)
            .collect())
    }

    pub fn find_by_type(&self, memory_type: MemoryType) -> Result<Vec<Memory>> {
        self.search(&MemoryQuery {
            memory_type: Some(memory_type),
            ..MemoryQuery::default()
        })
    }

    pub fn find_by_context(&self, context: &str) -> Result<Vec<Memory>> {
        self.search(&MemoryQuery {
            context: Some(context.to_string()),
            ..MemoryQuery::default()
        })
    }

    pub fn find_by_tag(&self, tag: &str) -> Result<Vec<Memory>> {
        self.search(&MemoryQuery {
            tags: vec![tag.to_string()],
            ..MemoryQuery::default()
        })
    }

    pub fn find_by_source(&self, source: &str) -> Result<Vec<Memory>> {
        self.search(&MemoryQuery {
            source: Some(source.to_string()),
            ..MemoryQuery::default()
        })
    }

    /// The `limit` most recent memories by timestamp.
    pub fn find_recent(&self, limit: u64) -> Result<Vec<Memory>> {
        self.search(&MemoryQuery {
            order_by: Some(("timestamp".to_string(), SortDirection::Desc)),
            limit: Some(limit),
            ..MemoryQuery::default()
        })
    }

    /// Memories with importance of at least `min_importance`, most
    /// important first.
    pub fn find_important(&self, min_importance: f64, limit: u64) -> Result<Vec<Memory>> {
        self.search(&MemoryQuery {
            min_importance: Some(min_importance),
            order_by: Some(("importance".to_string(), SortDirection::Desc)),
            limit: Some(limit),
            ..MemoryQuery::default()
        })
    }

    /// Count one more access at `at`.
    pub fn record_access(&self, id: &str, at: DateTime<Utc>) -> Result<Memory> {
        // `at` is caller-supplied; `updated_at` follows the wall clock and
        // never moves backwards.
        let changed = self.repo.db().run(
            "UPDATE memories
             SET access_count = access_count + 1,
                 last_accessed = ?,
                 updated_at = MAX(?, created_at, updated_at)
             WHERE id = ?",
            &[
                codec::datetime(&at),
                codec::datetime(&Utc::now()),
                codec::text(id),
            ],
        )?;
        if changed.rows_affected == 0 {
            return Err(StorageError::NotFound {
                entity: Memory::NAME,
                id: id.to_string(),
            });
        }
        self.repo.require(id)
    }

    /// Add an edge from `id`. An existing edge to the same target with the
    /// same type is replaced.
    pub fn add_relationship(&self, id: &str, relationship: MemoryRelationship) -> Result<Memory> {
        if relationship.target_id == id {
            return Err(StorageError::Validation(
                "a memory cannot relate to itself".into(),
            ));
        }
        let memory = self.repo.require(id)?;
        if !self.repo.exists(&relationship.target_id)? {
            return Err(StorageError::NotFound {
                entity: Memory::NAME,
                id: relationship.target_id,
            });
        }
        let mut relationships = memory
            .relationships
            .into_iter()
            .filter(|edge| {
                !(edge.target_id == relationship.target_id
                    && edge.relation_type == relationship.relation_type)
            })
            .collect::<Vec<_>>();
        relationships.push(relationship);
        self.repo.update_existing(
            id,
            &MemoryUpdate {
                relationships: Some(relationships),
                ..MemoryUpdate::default()
            },
        )
    }

    /// Drop edges from `id` to `target_id`, of one type or of every type.
    pub fn remove_relationship(
        &self,
        id: &str,
        target_id: &str,
        relation_type: Option<RelationType>,
    ) -> Result<Memory> {
        let memory = self.repo.require(id)?;
        let before = memory.relationships.len();
        let relationships = memory
            .relationships
            .iter()
            .filter(|edge| {
                !(edge.target_id == target_id
                    && relation_type.map_or(true, |kind| edge.relation_type == kind))
            })
            .cloned()
            .collect::<Vec<_>>();
        if relationships.len() == before {
            return Ok(memory);
        }
        self.repo.update_existing(
            id,
            &MemoryUpdate {
                relationships: Some(relationships),
                ..MemoryUpdate::default()
            },
        )
    }

    /// Number of memories carrying each tag.
    pub fn tag_counts(&self) -> Result<BTreeMap<String, i64>> {
        let rows = self.repo.db().all(
            "SELECT tag, COUNT(*) FROM memory_tags GROUP BY tag ORDER BY tag",
            &[],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(rows.into_iter().collect())
    }

    pub fn statistics(&self, filter: &Filter) -> Result<MemoryStatistics> {
        let compiled = crate::filter::compile(&filter.predicates_only(), MEMORY_COLUMNS)?;
        let total_accesses = self
            .repo
            .db()
            .get(
                &compiled.apply_to("SELECT COALESCE(SUM(access_count), 0) FROM memories"),
                &compiled.params,
                |row| row.get::<_, i64>(0),
            )?
            .unwrap_or(0);
        Ok(MemoryStatistics {
            total: self.repo.count(filter)?,
            by_type: self.repo.group_counts("memory_type", filter)?,
            by_context: self.repo.group_counts("context", filter)?,
            average_importance: self.repo.average("importance", filter)?,
            average_confidence: self.repo.average("confidence", filter)?,
            total_accesses,
        })
    }

    /// Store (or replace) the embedding vector of a memory.
    pub fn store_embedding(&self, memory_id: &str, vector: &[f32], model: &str) -> Result<()> {
        if vector.is_empty() {
            return Err(StorageError::Validation("embedding must not be empty".into()));
        }
        if !self.repo.exists(memory_id)? {
            return Err(StorageError::NotFound {
                entity: Memory::NAME,
                id: memory_id.to_string(),
            });
        }
        let blob = vector
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>();
        self.repo.db().run(
            "INSERT OR REPLACE INTO memory_embeddings
                 (memory_id, embedding, dimensions, model, created_at)
             VALUES (?, ?, ?, ?, ?)",
            &[
                codec::text(memory_id),
                Value::Blob(blob),
                Value::Integer(vector.len() as i64),
                codec::text(model),
                codec::datetime(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn embedding(&self, memory_id: &str) -> Result<Option<StoredEmbedding>> {
        let row = self.repo.db().get(
            "SELECT memory_id, embedding, dimensions, model, created_at
             FROM memory_embeddings WHERE memory_id = ?",
            &[codec::text(memory_id)],
            |row| {
                Ok((
                    row.get::<_, String>("memory_id")?,
                    row.get::<_, Vec<u8>>("embedding")?,
                    row.get::<_, i64>("dimensions")?,
                    row.get::<_, String>("model")?,
                    codec::datetime_column(row, "created_at")?,
                ))
            },
        )?;
        let Some((memory_id, blob, dimensions, model, created_at)) = row else {
            return Ok(None);
        };
        if blob.len() % 4 != 0 || (blob.len() / 4) as i64 != dimensions {
            return Err(StorageError::Codec(format!(
                "embedding for {} has {} bytes but claims {} dimensions",
                memory_id,
                blob.len(),
                dimensions
            )));
        }
        let vector = blob
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Some(StoredEmbedding {
            memory_id,
            vector,
            model,
            created_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::migrations::Migrator;

    fn make_repo() -> MemoryRepository {
        let db = Arc::new(Database::in_memory());
        Migrator::new(db.clone()).migrate_up().unwrap();
        MemoryRepository::new(db)
    }

    fn remember(repo: &MemoryRepository, content: &str) -> Memory {
        repo.create(NewMemory::new(MemoryType::Fact, content)).unwrap()
    }

    #[test]
    fn test_roundtrip_with_relationships_and_metadata() {
        let repo = make_repo();
        let target = remember(&repo, "target");
        let mut draft = NewMemory::new(MemoryType::Insight, "Builds fail on Fridays");
        draft.context = "ci".into();
        draft.importance = 0.8;
        draft.tags = vec!["ci".into(), "flaky".into()];
        draft.source = Some("retro".into());
        draft.relationships = vec![MemoryRelationship::new(
            target.id.clone(),
            RelationType::DerivedFrom,
            0.7,
        )];
        draft.metadata = taskmind_core::types::Metadata::new().with("sprint", 12);
        let created = repo.create(draft).unwrap();
        assert_eq!(repo.find_by_id(&created.id).unwrap().unwrap(), created);
    }

    #[test]
    fn test_importance_out_of_range_rejected() {
        let repo = make_repo();
        let mut draft = NewMemory::new(MemoryType::Fact, "x");
        draft.importance = 1.5;
        assert!(matches!(repo.create(draft), Err(StorageError::Validation(_))));

        let ok = remember(&repo, "y");
        let err = repo
            .update(
                &ok.id,
                &MemoryUpdate {
                    confidence: Some(-0.1),
                    ..MemoryUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn test_find_similar_threshold_and_order() {
        let repo = make_repo();
        let exact = remember(&repo, "Urgent deployment issue");
        let half = remember(&repo, "deployment issue resolved");
        remember(&repo, "lunch menu for friday");
        remember(&repo, "urgent: call the dentist");

        let results = repo
            .find_similar("urgent deployment issue", &SimilarityOptions::default())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, exact.id);
        assert_eq!(results[0].similarity, 1.0);
        assert_eq!(results[1].memory.id, half.id);
        assert!(results.iter().all(|r| r.similarity >= 0.5));
        assert!(results[0].similarity > results[1].similarity);
    }

    #[test]
    fn test_find_similar_context_and_limit() {
        let repo = make_repo();
        for context in ["ops", "ops", "dev"] {
            let mut draft = NewMemory::new(MemoryType::Fact, "disk almost full");
            draft.context = context.into();
            repo.create(draft).unwrap();
        }
        let options = SimilarityOptions {
            context: Some("ops".into()),
            ..SimilarityOptions::default()
        };
        assert_eq!(repo.find_similar("disk full", &options).unwrap().len(), 2);

        let options = SimilarityOptions {
            limit: 1,
            ..SimilarityOptions::default()
        };
        assert_eq!(repo.find_similar("disk almost full", &options).unwrap().len(), 1);
        assert!(repo
            .find_similar("", &SimilarityOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_options_from_config() {
        let config = MemoryConfig {
            similarity_threshold: 0.3,
            similarity_limit: 4,
        };
        let options = SimilarityOptions::from(&config);
        assert_eq!(options.threshold, 0.3);
        assert_eq!(options.limit, 4);
    }

    #[test]
    fn test_search_structured_filters() {
        let repo = make_repo();
        let now = Utc::now();
        let mut a = NewMemory::new(MemoryType::Preference, "Prefers dark mode");
        a.tags = vec!["ui".into(), "settings".into()];
        a.importance = 0.9;
        a.timestamp = Some(now - Duration::days(1));
        let a = repo.create(a).unwrap();
        let mut b = NewMemory::new(MemoryType::Preference, "Prefers tabs");
        b.tags = vec!["editor".into()];
        b.importance = 0.2;
        repo.create(b).unwrap();

        let found = repo
            .search(&MemoryQuery {
                memory_type: Some(MemoryType::Preference),
                tags: vec!["ui".into(), "settings".into()],
                min_importance: Some(0.5),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let text = repo
            .search(&MemoryQuery {
                text: Some("prefers".into()),
                until: Some(now - Duration::hours(1)),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(repo.find_by_tag("editor").unwrap().len(), 1);
        assert_eq!(repo.find_by_type(MemoryType::Fact).unwrap().len(), 0);
    }

    #[test]
    fn test_search_relationship_post_filter() {
        let repo = make_repo();
        let root = remember(&repo, "root");
        let other = remember(&repo, "other");
        let child = remember(&repo, "child");
        let sibling = remember(&repo, "sibling");
        repo.add_relationship(
            &child.id,
            MemoryRelationship::new(root.id.clone(), RelationType::DerivedFrom, 0.9),
        )
        .unwrap();
        repo.add_relationship(
            &sibling.id,
            MemoryRelationship::new(other.id.clone(), RelationType::DerivedFrom, 0.4),
        )
        .unwrap();

        let derived = repo
            .search(&MemoryQuery {
                relationship: Some(RelationshipFilter {
                    relation_type: RelationType::DerivedFrom,
                    target_id: None,
                }),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(derived.len(), 2);

        let from_root = repo
            .search(&MemoryQuery {
                relationship: Some(RelationshipFilter {
                    relation_type: RelationType::DerivedFrom,
                    target_id: Some(root.id.clone()),
                }),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(from_root.len(), 1);
        assert_eq!(from_root[0].id, child.id);

        let limited = repo
            .search(&MemoryQuery {
                relationship: Some(RelationshipFilter {
                    relation_type: RelationType::DerivedFrom,
                    target_id: None,
                }),
                limit: Some(1),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_relationship_edits() {
        let repo = make_repo();
        let a = remember(&repo, "a");
        let b = remember(&repo, "b");

        repo.add_relationship(&a.id, MemoryRelationship::new(b.id.clone(), RelationType::Supports, 0.3))
            .unwrap();
        let a2 = repo
            .add_relationship(&a.id, MemoryRelationship::new(b.id.clone(), RelationType::Supports, 0.6))
            .unwrap();
        assert_eq!(a2.relationships.len(), 1);
        assert_eq!(a2.relationships[0].strength, 0.6);

        assert!(repo
            .add_relationship(&a.id, MemoryRelationship::new(a.id.clone(), RelationType::Supports, 0.1))
            .is_err());
        assert!(matches!(
            repo.add_relationship(&a.id, MemoryRelationship::new("ghost", RelationType::Supports, 0.1)),
            Err(StorageError::NotFound { .. })
        ));

        let a3 = repo.remove_relationship(&a.id, &b.id, None).unwrap();
        assert!(a3.relationships.is_empty());
    }

    #[test]
    fn test_record_access() {
        let repo = make_repo();
        let m = remember(&repo, "visited");
        let at = Utc::now();
        repo.record_access(&m.id, at).unwrap();
        let m = repo.record_access(&m.id, at).unwrap();
        assert_eq!(m.access_count, 2);
        assert_eq!(m.last_accessed, Some(at));
        assert!(m.updated_at >= m.created_at);
        assert!(matches!(
            repo.record_access("ghost", at),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_record_access_keeps_updated_at_monotonic() {
        let repo = make_repo();
        let m = remember(&repo, "time travel");
        let now = Utc::now();

        let ahead = repo.record_access(&m.id, now + Duration::days(3)).unwrap();
        assert_eq!(ahead.last_accessed, Some(now + Duration::days(3)));
        assert!(ahead.updated_at >= m.updated_at);
        assert!(ahead.updated_at <= Utc::now());

        let behind = repo.record_access(&m.id, now - Duration::days(3)).unwrap();
        assert_eq!(behind.last_accessed, Some(now - Duration::days(3)));
        assert!(behind.updated_at >= ahead.updated_at);
        assert!(behind.updated_at <= Utc::now());
        assert_eq!(behind.access_count, 2);
    }

    #[test]
    fn test_recent_and_important() {
        let repo = make_repo();
        let now = Utc::now();
        for (i, importance) in [0.1, 0.9, 0.6].iter().enumerate() {
            let mut draft = NewMemory::new(MemoryType::Fact, format!("m{}", i));
            draft.importance = *importance;
            draft.timestamp = Some(now - Duration::minutes(i as i64));
            repo.create(draft).unwrap();
        }
        let recent = repo.find_recent(2).unwrap();
        assert_eq!(recent[0].content, "m0");
        assert_eq!(recent[1].content, "m1");

        let important = repo.find_important(0.5, 10).unwrap();
        let contents: Vec<_> = important.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[test]
    fn test_full_text_search() {
        let repo = make_repo();
        let m = remember(&repo, "The staging database migrated cleanly");
        remember(&repo, "Coffee machine is broken");
        let hits = repo.full_text_search("database staging", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, m.id);
    }

    #[test]
    fn test_tag_counts_and_statistics() {
        let repo = make_repo();
        for tags in [vec!["a", "b"], vec!["a"]] {
            let mut draft = NewMemory::new(MemoryType::Pattern, "tagged");
            draft.tags = tags.into_iter().map(String::from).collect();
            draft.importance = 0.4;
            repo.create(draft).unwrap();
        }
        let m = remember(&repo, "untagged");
        repo.record_access(&m.id, Utc::now()).unwrap();

        let counts = repo.tag_counts().unwrap();
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));

        let stats = repo.statistics(&Filter::new()).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("PATTERN"), Some(&2));
        assert_eq!(stats.total_accesses, 1);
        let avg = stats.average_importance.unwrap();
        assert!((avg - (0.4 + 0.4 + 0.5) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let repo = make_repo();
        let m = remember(&repo, "embedded");
        assert!(repo.embedding(&m.id).unwrap().is_none());

        repo.store_embedding(&m.id, &[0.25, -1.5, 3.0], "test-model").unwrap();
        let stored = repo.embedding(&m.id).unwrap().unwrap();
        assert_eq!(stored.vector, vec![0.25, -1.5, 3.0]);
        assert_eq!(stored.model, "test-model");

        assert!(repo.store_embedding("ghost", &[1.0], "m").is_err());
        assert!(repo.store_embedding(&m.id, &[], "m").is_err());

        repo.delete(&m.id).unwrap();
        assert!(repo.embedding(&m.id).unwrap().is_none());
    }
}
