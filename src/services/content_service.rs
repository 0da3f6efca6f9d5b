//! Content service - business logic for the versioned item bank
//!
//! Wraps the item repository with validation, event emission, and the
//! batch import pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::db::items::{self, ImportOutcome, ImportRow, ItemQuery, ItemRow, RevisionRow, SaveItemInput};
use crate::db::EngineDb;
use crate::error::EngineError;

use super::events::{EngineEvent, EventBus};

/// Per-row result of an import batch
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportRowResult {
    pub row: usize,
    pub outcome: ImportOutcome,
}

/// Content service for the item bank
pub struct ContentService {
    db: Arc<EngineDb>,
    events: Arc<EventBus>,
}

impl ContentService {
    /// Create a new content service
    pub fn new(db: Arc<EngineDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get item by ID
    pub fn get(&self, id: &str) -> Result<Option<ItemRow>, EngineError> {
        self.db.with_conn(|conn| items::get_item(conn, id))
    }

    /// List items with filters
    pub fn list(&self, query: &ItemQuery) -> Result<Vec<ItemRow>, EngineError> {
        self.db.with_conn(|conn| items::list_items(conn, query))
    }

    /// Revision history for an item, newest first
    pub fn revisions(&self, item_id: &str) -> Result<Vec<RevisionRow>, EngineError> {
        self.db.with_conn(|conn| {
            if items::get_item(conn, item_id)?.is_none() {
                return Err(EngineError::NotFound(format!("item {}", item_id)));
            }
            items::list_revisions(conn, item_id)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Save an item (insert or CAS update), appending one revision
    pub fn save(&self, input: SaveItemInput, editor: &str) -> Result<ItemRow, EngineError> {
        self.validate(&input)?;

        let is_update = input.id.is_some();
        let item = self.db.with_conn_mut(|conn| items::save_item(conn, input, editor))?;

        if is_update {
            self.events.emit(EngineEvent::ItemUpdated {
                id: item.id.clone(),
                version: item.version,
            });
        } else {
            self.events.emit(EngineEvent::ItemCreated {
                id: item.id.clone(),
                version: item.version,
            });
        }

        Ok(item)
    }

    /// Revert an item to a revision's before snapshot
    pub fn revert(&self, item_id: &str, revision_id: &str, editor: &str) -> Result<ItemRow, EngineError> {
        let item = self
            .db
            .with_conn_mut(|conn| items::revert_item(conn, item_id, revision_id, editor))?;

        self.events.emit(EngineEvent::ItemReverted {
            id: item.id.clone(),
            version: item.version,
        });

        Ok(item)
    }

    /// Import a batch of raw rows. Each row is classified as inserted,
    /// skipped duplicate, or error; one bad row never aborts the batch
    /// and there is no batch-level transaction. With `dry_run` the same
    /// classification runs with no writes.
    pub fn import(
        &self,
        rows: Vec<ImportRow>,
        dry_run: bool,
        editor: &str,
    ) -> Result<Vec<ImportRowResult>, EngineError> {
        let mut results = Vec::with_capacity(rows.len());
        // Hashes seen in this batch, so an in-batch duplicate is caught
        // before it reaches the store
        let mut seen: HashMap<String, String> = HashMap::new();

        let mut inserted = 0usize;
        let mut skipped = 0usize;
        let mut errors = 0usize;

        for (index, raw) in rows.into_iter().enumerate() {
            let outcome = self.import_row(&raw, dry_run, editor, &mut seen);
            match &outcome {
                ImportOutcome::Inserted { .. } => inserted += 1,
                ImportOutcome::Duplicate { .. } => skipped += 1,
                ImportOutcome::Error { message } => {
                    warn!(row = index, message = %message, "Import row rejected");
                    errors += 1;
                }
            }
            results.push(ImportRowResult { row: index, outcome });
        }

        info!(inserted, skipped, errors, dry_run, "Import batch processed");
        self.events.emit(EngineEvent::ItemsImported {
            inserted,
            skipped,
            errors,
            dry_run,
        });

        Ok(results)
    }

    fn import_row(
        &self,
        raw: &ImportRow,
        dry_run: bool,
        editor: &str,
        seen: &mut HashMap<String, String>,
    ) -> ImportOutcome {
        let input = match items::normalize_row(raw) {
            Ok(input) => input,
            Err(message) => return ImportOutcome::Error { message },
        };

        let hash = items::content_hash(&input.module_tag, &input.locale, &input.question, &input.choices);

        if let Some(existing_id) = seen.get(&hash) {
            return ImportOutcome::Duplicate {
                existing_id: existing_id.clone(),
            };
        }

        let existing = match self.db.with_conn(|conn| items::get_item_by_hash(conn, &hash)) {
            Ok(existing) => existing,
            Err(e) => {
                return ImportOutcome::Error {
                    message: e.to_string(),
                }
            }
        };
        if let Some(existing) = existing {
            seen.insert(hash, existing.id.clone());
            return ImportOutcome::Duplicate {
                existing_id: existing.id,
            };
        }

        if dry_run {
            seen.insert(hash, "(dry run)".to_string());
            return ImportOutcome::Inserted {
                id: "(dry run)".to_string(),
            };
        }

        match self.db.with_conn_mut(|conn| items::save_item(conn, input, editor)) {
            Ok(item) => {
                seen.insert(hash, item.id.clone());
                ImportOutcome::Inserted { id: item.id }
            }
            // Raced another writer between the hash check and the insert
            Err(EngineError::DuplicateContent(_)) => {
                let existing_id = self
                    .db
                    .with_conn(|conn| items::get_item_by_hash(conn, &hash))
                    .ok()
                    .flatten()
                    .map(|item| item.id)
                    .unwrap_or_default();
                ImportOutcome::Duplicate { existing_id }
            }
            Err(e) => ImportOutcome::Error {
                message: e.to_string(),
            },
        }
    }

    fn validate(&self, input: &SaveItemInput) -> Result<(), EngineError> {
        if input.question.trim().is_empty() {
            return Err(EngineError::Validation("question must not be empty".to_string()));
        }
        if input.module_tag.trim().is_empty() {
            return Err(EngineError::Validation("module_tag must not be empty".to_string()));
        }
        if input.choices.len() < 2 {
            return Err(EngineError::Validation(
                "at least two choices are required".to_string(),
            ));
        }
        if input.correct_index < 0 || input.correct_index as usize >= input.choices.len() {
            return Err(EngineError::Validation(format!(
                "correct_index {} out of range for {} choices",
                input.correct_index,
                input.choices.len()
            )));
        }
        if !(1..=5).contains(&input.difficulty) {
            return Err(EngineError::Validation(format!(
                "difficulty {} out of range 1-5",
                input.difficulty
            )));
        }
        if input.status != "draft" && input.status != "published" {
            return Err(EngineError::Validation(format!(
                "unknown status '{}'",
                input.status
            )));
        }
        Ok(())
    }
}
