//! SQL DDL for all engram tables.
//!
//! Defines `memories`, `memories_vec` (vec0), `claims`, `claim_assertions`,
//! `claim_edges`, `slot_state`, `memory_recall_events`, and `schema_meta`.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for engram's core tables.
const SCHEMA_SQL: &str = r#"
-- Durable per-subject memories
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    text TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'fact' CHECK(kind IN ('fact','preference','context','note','event','trait')),
    visibility TEXT NOT NULL DEFAULT 'private' CHECK(visibility IN ('private','shared','public')),
    importance INTEGER NOT NULL DEFAULT 50 CHECK(importance >= 0 AND importance <= 100),
    confidence REAL NOT NULL DEFAULT 0.95 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    is_temporal INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','superseded')),
    superseded_by TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    source_type TEXT NOT NULL DEFAULT 'explicit',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_reinforced_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_subject ON memories(project_id, subject_id);
CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

-- Structured predicate/value assertions derived from memories
CREATE TABLE IF NOT EXISTS claims (
    claim_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object_value TEXT NOT NULL,
    slot TEXT NOT NULL,
    claim_type TEXT NOT NULL DEFAULT 'fact',
    confidence REAL NOT NULL DEFAULT 0.9 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    tags TEXT NOT NULL DEFAULT '[]',
    source_memory_id TEXT,
    subject_entity TEXT NOT NULL DEFAULT 'self',
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','retracted')),
    retracted_at TEXT,
    retract_reason TEXT,
    valid_from TEXT,
    valid_until TEXT,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_claims_subject ON claims(project_id, subject_id);
CREATE INDEX IF NOT EXISTS idx_claims_slot ON claims(project_id, subject_id, slot);
CREATE INDEX IF NOT EXISTS idx_claims_source ON claims(source_memory_id);

-- One row per evidence occurrence of a claim
CREATE TABLE IF NOT EXISTS claim_assertions (
    assertion_id TEXT PRIMARY KEY,
    claim_id TEXT NOT NULL REFERENCES claims(claim_id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    memory_id TEXT,
    object_type TEXT NOT NULL DEFAULT 'string' CHECK(object_type IN ('string','number','date','json')),
    value_string TEXT,
    value_number REAL,
    value_date TEXT,
    value_json TEXT,
    confidence REAL NOT NULL DEFAULT 0.9,
    status TEXT NOT NULL DEFAULT 'active',
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assertions_claim ON claim_assertions(claim_id);
CREATE INDEX IF NOT EXISTS idx_assertions_memory ON claim_assertions(memory_id);

-- Typed directed relations between claims
CREATE TABLE IF NOT EXISTS claim_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    from_claim_id TEXT NOT NULL,
    to_claim_id TEXT NOT NULL,
    edge_type TEXT NOT NULL CHECK(edge_type IN ('supersedes','supports','duplicates','related','retracts')),
    weight REAL NOT NULL DEFAULT 1.0,
    reason_code TEXT,
    reason_text TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(project_id, from_claim_id, to_claim_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON claim_edges(from_claim_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON claim_edges(to_claim_id);

-- Current winner per (project, subject, slot)
CREATE TABLE IF NOT EXISTS slot_state (
    project_id TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    slot TEXT NOT NULL,
    active_claim_id TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','superseded','retracted')),
    replaced_by_claim_id TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project_id, subject_id, slot)
);

-- Audit row for each time a memory was used in a recall
CREATE TABLE IF NOT EXISTS memory_recall_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    memory_id TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    message_index INTEGER NOT NULL DEFAULT 0,
    similarity REAL NOT NULL DEFAULT 0.0,
    request_type TEXT NOT NULL,
    model_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recalls_chat ON memory_recall_events(chat_id);
CREATE INDEX IF NOT EXISTS idx_recalls_memory ON memory_recall_events(memory_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memories_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[1536]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "memories",
            "claims",
            "claim_assertions",
            "claim_edges",
            "slot_state",
            "memory_recall_events",
            "schema_meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }

        // Verify the vec0 virtual table is functional
        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn slot_state_is_unique_per_triple() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO slot_state (project_id, subject_id, slot, active_claim_id, status, updated_at) \
             VALUES ('p', 's', 'favorite_color', 'clm_1', 'active', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO slot_state (project_id, subject_id, slot, active_claim_id, status, updated_at) \
             VALUES ('p', 's', 'favorite_color', 'clm_2', 'active', '2026-01-01T00:00:01Z')",
            [],
        );
        assert!(dup.is_err());
    }
}
