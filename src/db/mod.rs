//! SQLite database module for the assessment engine
//!
//! ## Tables
//!
//! - `items` / `item_tags` - versioned assessment items with topic tags
//! - `item_revisions` - append-only audit log of item mutations
//! - `blueprints` - per (course, locale) sampling policies
//! - `attempts` - exam attempts with their frozen question sets
//! - `certificates` - issued credentials with verification codes

pub mod schema;
pub mod items;
pub mod blueprints;
pub mod attempts;
pub mod certificates;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::EngineError;

/// SQLite database for the engine
pub struct EngineDb {
    conn: Mutex<Connection>,
}

impl EngineDb {
    /// Open or create the engine database
    pub fn open(storage_dir: &Path) -> Result<Self, EngineError> {
        let db_path = storage_dir.join("proctor.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| EngineError::Internal(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| EngineError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<T, EngineError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, EngineError> {
        self.with_conn(|conn| {
            let item_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

            let revision_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM item_revisions", [], |row| row.get(0))
                .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

            let attempt_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM attempts", [], |row| row.get(0))
                .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

            let certificate_count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM certificates WHERE revoked = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

            Ok(DbStats {
                item_count: item_count as u64,
                revision_count: revision_count as u64,
                attempt_count: attempt_count as u64,
                certificate_count: certificate_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub item_count: u64,
    pub revision_count: u64,
    pub attempt_count: u64,
    pub certificate_count: u64,
}

/// Current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// Re-exports
pub use items::{ItemRow, RevisionRow, SaveItemInput, ImportRow, ImportOutcome, ItemQuery};
pub use blueprints::{BlueprintRow, BlueprintPolicy, UpsertBlueprintInput};
pub use attempts::{AttemptRow, AttemptStatus};
pub use certificates::CertificateRow;
