//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| EngineError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(ITEMS_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create item tables: {}", e)))?;

    conn.execute_batch(EXAM_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create exam tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), EngineError> {
    // Add migration steps here as schema evolves
    match from_version {
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Assessment item and revision schema
const ITEMS_SCHEMA: &str = r#"
-- Assessment items (one row per question)
-- Items are never hard-deleted; active = 0 is the deactivation path
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY NOT NULL,
    module_tag TEXT NOT NULL,
    locale TEXT NOT NULL DEFAULT 'en',
    question TEXT NOT NULL,
    choices_json TEXT NOT NULL,
    correct_index INTEGER NOT NULL,
    difficulty INTEGER NOT NULL DEFAULT 3,

    -- Lifecycle
    active INTEGER NOT NULL DEFAULT 1,
    exam_candidate INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'draft',

    -- Versioning and duplicate detection
    version INTEGER NOT NULL DEFAULT 1,
    content_hash TEXT NOT NULL UNIQUE,

    -- Authorship
    created_by TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Topic tags stored separately for efficient querying
CREATE TABLE IF NOT EXISTS item_tags (
    item_id TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (item_id, tag),
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

-- Append-only revision log; one row per mutating save, never updated
CREATE TABLE IF NOT EXISTS item_revisions (
    id TEXT PRIMARY KEY NOT NULL,
    item_id TEXT NOT NULL,
    editor TEXT NOT NULL,
    action TEXT NOT NULL,
    version INTEGER NOT NULL,
    before_json TEXT NOT NULL,
    after_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (item_id) REFERENCES items(id)
);
"#;

/// Blueprints, attempts, certificates
const EXAM_SCHEMA: &str = r#"
-- Sampling policies per (course, locale)
CREATE TABLE IF NOT EXISTS blueprints (
    id TEXT PRIMARY KEY NOT NULL,
    course TEXT NOT NULL,
    locale TEXT NOT NULL DEFAULT 'en',
    question_count INTEGER NOT NULL,
    difficulty_weights_json TEXT NOT NULL DEFAULT '{}',
    tag_weights_json TEXT NOT NULL DEFAULT '{}',
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Exam attempts; question_ids_json is frozen at creation
CREATE TABLE IF NOT EXISTS attempts (
    id TEXT PRIMARY KEY NOT NULL,
    learner TEXT NOT NULL,
    course TEXT NOT NULL,
    locale TEXT NOT NULL DEFAULT 'en',
    question_ids_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'in_progress',
    started_at TEXT NOT NULL,
    finished_at TEXT,
    score REAL,
    correct_count INTEGER,
    total_count INTEGER,
    answers_json TEXT
);

-- Issued certificates; codes resolve through the public verify endpoint
CREATE TABLE IF NOT EXISTS certificates (
    id TEXT PRIMARY KEY NOT NULL,
    learner TEXT NOT NULL,
    learner_label TEXT,
    course TEXT NOT NULL,
    attempt_id TEXT,
    verification_code TEXT NOT NULL UNIQUE,
    score REAL,
    issued_at TEXT NOT NULL,
    document_ref TEXT,
    revoked INTEGER NOT NULL DEFAULT 0
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
-- Item indexes
CREATE INDEX IF NOT EXISTS idx_items_module_tag ON items(module_tag);
CREATE INDEX IF NOT EXISTS idx_items_locale ON items(locale);
CREATE INDEX IF NOT EXISTS idx_items_candidates ON items(active, exam_candidate, locale);
CREATE INDEX IF NOT EXISTS idx_item_tags_tag ON item_tags(tag);
CREATE INDEX IF NOT EXISTS idx_item_revisions_item ON item_revisions(item_id, version);

-- One active blueprint per (course, locale)
CREATE UNIQUE INDEX IF NOT EXISTS idx_blueprints_active
    ON blueprints(course, locale) WHERE active = 1;

-- Attempt indexes
CREATE INDEX IF NOT EXISTS idx_attempts_learner ON attempts(learner, course);
CREATE INDEX IF NOT EXISTS idx_attempts_status ON attempts(status);

-- At most one live certificate per (learner, course)
CREATE UNIQUE INDEX IF NOT EXISTS idx_certificates_live
    ON certificates(learner, course) WHERE revoked = 0;
CREATE INDEX IF NOT EXISTS idx_certificates_code ON certificates(verification_code);
"#;
