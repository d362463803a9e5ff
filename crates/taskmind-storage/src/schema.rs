//! Built-in schema migration units.

use crate::db::Database;
use crate::error::Result;
use crate::migrations::MigrationUnit;

/// Every shipped migration unit.
pub fn registry() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::new("001-initial-schema", initial_schema_up, initial_schema_down),
        MigrationUnit::new("002-memory-fts", memory_fts_up, memory_fts_down),
        MigrationUnit::new(
            "003-memory-embeddings",
            memory_embeddings_up,
            memory_embeddings_down,
        ),
    ]
}

/// Tables owned by the repositories, in dependency order.
pub const ENTITY_TABLES: &[&str] = &["tasks", "time_entries", "notifications", "memories"];

fn initial_schema_up(db: &Database) -> Result<()> {
    db.atomic(|| {
        db.execute_batch(
            "
            -- Tasks.
            CREATE TABLE IF NOT EXISTS tasks (
                id                  TEXT PRIMARY KEY NOT NULL,
                title               TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                task_type           TEXT NOT NULL DEFAULT 'OTHER',
                status              TEXT NOT NULL DEFAULT 'CREATED',
                priority            TEXT NOT NULL DEFAULT 'MEDIUM',
                assignee            TEXT,
                project_id          TEXT,
                due_date            DATETIME,
                estimated_minutes   INTEGER,
                actual_minutes      INTEGER,
                dependencies        TEXT NOT NULL DEFAULT '[]',
                tags                TEXT NOT NULL DEFAULT '[]',
                metadata            TEXT NOT NULL DEFAULT '{}',
                created_at          DATETIME NOT NULL,
                updated_at          DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
            CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks (priority);
            CREATE INDEX IF NOT EXISTS idx_tasks_due_date
                ON tasks (due_date)
                WHERE due_date IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee
                ON tasks (assignee)
                WHERE assignee IS NOT NULL;

            CREATE TABLE IF NOT EXISTS task_tags (
                task_id     TEXT NOT NULL,
                tag         TEXT NOT NULL,
                PRIMARY KEY (task_id, tag),
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_task_tags_tag ON task_tags (tag);

            -- Time entries.
            CREATE TABLE IF NOT EXISTS time_entries (
                id                  TEXT PRIMARY KEY NOT NULL,
                user_id             TEXT,
                task_id             TEXT,
                start_time          DATETIME NOT NULL,
                end_time            DATETIME,
                duration_minutes    INTEGER,
                description         TEXT NOT NULL DEFAULT '',
                category            TEXT NOT NULL DEFAULT '',
                entry_type          TEXT NOT NULL DEFAULT 'MANUAL',
                billable            INTEGER NOT NULL DEFAULT 0,
                tags                TEXT NOT NULL DEFAULT '[]',
                metadata            TEXT NOT NULL DEFAULT '{}',
                created_at          DATETIME NOT NULL,
                updated_at          DATETIME NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_time_entries_user ON time_entries (user_id);
            CREATE INDEX IF NOT EXISTS idx_time_entries_task ON time_entries (task_id);
            CREATE INDEX IF NOT EXISTS idx_time_entries_start_time ON time_entries (start_time);
            CREATE INDEX IF NOT EXISTS idx_time_entries_type ON time_entries (entry_type);

            CREATE TABLE IF NOT EXISTS time_entry_tags (
                time_entry_id   TEXT NOT NULL,
                tag             TEXT NOT NULL,
                PRIMARY KEY (time_entry_id, tag),
                FOREIGN KEY (time_entry_id) REFERENCES time_entries(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_time_entry_tags_tag ON time_entry_tags (tag);

            -- Notifications.
            CREATE TABLE IF NOT EXISTS notifications (
                id                  TEXT PRIMARY KEY NOT NULL,
                user_id             TEXT,
                notification_type   TEXT NOT NULL DEFAULT 'SYSTEM',
                priority            TEXT NOT NULL DEFAULT 'MEDIUM',
                status              TEXT NOT NULL DEFAULT 'PENDING',
                title               TEXT NOT NULL,
                message             TEXT NOT NULL DEFAULT '',
                read                INTEGER NOT NULL DEFAULT 0,
                timestamp           DATETIME NOT NULL,
                actions             TEXT NOT NULL DEFAULT '[]',
                expires_at          DATETIME,
                metadata            TEXT NOT NULL DEFAULT '{}',
                created_at          DATETIME NOT NULL,
                updated_at          DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user_read
                ON notifications (user_id, read);
            CREATE INDEX IF NOT EXISTS idx_notifications_timestamp
                ON notifications (timestamp DESC);

            -- Memories.
            CREATE TABLE IF NOT EXISTS memories (
                id              TEXT PRIMARY KEY NOT NULL,
                memory_type     TEXT NOT NULL DEFAULT 'FACT',
                content         TEXT NOT NULL,
                context         TEXT NOT NULL DEFAULT '',
                importance      REAL NOT NULL DEFAULT 0.5
                                CHECK (importance >= 0.0 AND importance <= 1.0),
                confidence      REAL NOT NULL DEFAULT 1.0
                                CHECK (confidence >= 0.0 AND confidence <= 1.0),
                timestamp       DATETIME NOT NULL,
                access_count    INTEGER NOT NULL DEFAULT 0,
                last_accessed   DATETIME,
                source          TEXT,
                tags            TEXT NOT NULL DEFAULT '[]',
                relationships   TEXT NOT NULL DEFAULT '[]',
                metadata        TEXT NOT NULL DEFAULT '{}',
                created_at      DATETIME NOT NULL,
                updated_at      DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_type ON memories (memory_type);
            CREATE INDEX IF NOT EXISTS idx_memories_context ON memories (context);
            CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories (timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories (importance DESC);

            CREATE TABLE IF NOT EXISTS memory_tags (
                memory_id   TEXT NOT NULL,
                tag         TEXT NOT NULL,
                PRIMARY KEY (memory_id, tag),
                FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags (tag);
            ",
        )
    })
}

fn initial_schema_down(db: &Database) -> Result<()> {
    db.atomic(|| {
        db.execute_batch(
            "
            DROP TABLE IF EXISTS memory_tags;
            DROP TABLE IF EXISTS memories;
            DROP TABLE IF EXISTS notifications;
            DROP TABLE IF EXISTS time_entry_tags;
            DROP TABLE IF EXISTS time_entries;
            DROP TABLE IF EXISTS task_tags;
            DROP TABLE IF EXISTS tasks;
            ",
        )
    })
}

/// External-content FTS5 index over `memories.content` and
/// `memories.context`, kept in sync by triggers. Existing rows are indexed
/// by the trailing `rebuild`.
fn memory_fts_up(db: &Database) -> Result<()> {
    db.atomic(|| {
        db.execute_batch(
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
                content, context,
                content='memories', content_rowid='rowid',
                tokenize='unicode61'
            );

            CREATE TRIGGER IF NOT EXISTS memories_fts_ai AFTER INSERT ON memories BEGIN
                INSERT INTO memory_fts(rowid, content, context)
                VALUES (new.rowid, new.content, new.context);
            END;

            CREATE TRIGGER IF NOT EXISTS memories_fts_ad AFTER DELETE ON memories BEGIN
                INSERT INTO memory_fts(memory_fts, rowid, content, context)
                VALUES ('delete', old.rowid, old.content, old.context);
            END;

            CREATE TRIGGER IF NOT EXISTS memories_fts_au AFTER UPDATE ON memories BEGIN
                INSERT INTO memory_fts(memory_fts, rowid, content, context)
                VALUES ('delete', old.rowid, old.content, old.context);
                INSERT INTO memory_fts(rowid, content, context)
                VALUES (new.rowid, new.content, new.context);
            END;

            INSERT INTO memory_fts(memory_fts) VALUES ('rebuild');
            ",
        )
    })
}

fn memory_fts_down(db: &Database) -> Result<()> {
    db.atomic(|| {
        db.execute_batch(
            "
            DROP TRIGGER IF EXISTS memories_fts_au;
            DROP TRIGGER IF EXISTS memories_fts_ad;
            DROP TRIGGER IF EXISTS memories_fts_ai;
            DROP TABLE IF EXISTS memory_fts;
            ",
        )
    })
}

/// One embedding blob per memory. Nothing in this crate computes
/// embeddings; the table only stores what callers hand in.
fn memory_embeddings_up(db: &Database) -> Result<()> {
    db.atomic(|| {
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memory_embeddings (
                memory_id   TEXT PRIMARY KEY NOT NULL,
                embedding   BLOB NOT NULL,
                dimensions  INTEGER NOT NULL,
                model       TEXT NOT NULL DEFAULT '',
                created_at  DATETIME NOT NULL,
                FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
            );
            ",
        )
    })
}

fn memory_embeddings_down(db: &Database) -> Result<()> {
    db.atomic(|| db.execute_batch("DROP TABLE IF EXISTS memory_embeddings;"))
}
