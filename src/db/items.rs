//! Assessment item CRUD, revision log, and import-row handling
//!
//! Every mutating save goes through compare-and-swap on the item version
//! and appends exactly one revision row. Items are never hard-deleted.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::db::current_timestamp;
use crate::error::EngineError;

/// Item row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: String,
    pub module_tag: String,
    pub locale: String,
    pub question: String,
    /// Ordered choice texts, stored as a JSON array
    pub choices_json: String,
    pub correct_index: i64,
    pub difficulty: i64,
    pub active: bool,
    pub exam_candidate: bool,
    pub status: String,
    pub version: i64,
    pub content_hash: String,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ItemRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            module_tag: row.get("module_tag")?,
            locale: row.get("locale")?,
            question: row.get("question")?,
            choices_json: row.get("choices_json")?,
            correct_index: row.get("correct_index")?,
            difficulty: row.get("difficulty")?,
            active: row.get::<_, i64>("active")? != 0,
            exam_candidate: row.get::<_, i64>("exam_candidate")? != 0,
            status: row.get("status")?,
            version: row.get("version")?,
            content_hash: row.get("content_hash")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            tags: vec![], // Loaded separately
        })
    }

    /// Parsed choice texts (empty on a malformed stored array)
    pub fn choices(&self) -> Vec<String> {
        serde_json::from_str(&self.choices_json).unwrap_or_default()
    }
}

/// Editable fields for a save; `expected_version` carries the version
/// the editor read, for compare-and-swap on updates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveItemInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
    pub module_tag: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub question: String,
    pub choices: Vec<String>,
    pub correct_index: i64,
    #[serde(default = "default_difficulty")]
    pub difficulty: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub exam_candidate: bool,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_locale() -> String { "en".to_string() }
fn default_difficulty() -> i64 { 3 }
fn default_true() -> bool { true }
fn default_status() -> String { "draft".to_string() }

/// Raw import row as received from an authoring export
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    #[serde(default)]
    pub module_tag: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub correct_index: Option<i64>,
    #[serde(default)]
    pub difficulty: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exam_candidate: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Per-row import classification
#[derive(Debug, Clone, Serialize)]
pub enum ImportOutcome {
    Inserted { id: String },
    Duplicate { existing_id: String },
    Error { message: String },
}

/// Query parameters for listing items
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuery {
    #[serde(default)]
    pub module_tag: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 { 100 }

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            module_tag: None,
            locale: None,
            active: None,
            status: None,
            tag: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Immutable revision record
#[derive(Debug, Clone, Serialize)]
pub struct RevisionRow {
    pub id: String,
    pub item_id: String,
    pub editor: String,
    pub action: String,
    pub version: i64,
    pub before_json: String,
    pub after_json: String,
    pub created_at: String,
}

impl RevisionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            item_id: row.get("item_id")?,
            editor: row.get("editor")?,
            action: row.get("action")?,
            version: row.get("version")?,
            before_json: row.get("before_json")?,
            after_json: row.get("after_json")?,
            created_at: row.get("created_at")?,
        })
    }
}

// ============================================================================
// Content hashing
// ============================================================================

/// Deterministic digest over the identifying fields of an item, used to
/// detect duplicate imports. Whitespace-insensitive so re-exports with
/// shuffled formatting still dedupe; choice order is significant.
pub fn content_hash(module_tag: &str, locale: &str, question: &str, choices: &[String]) -> String {
    fn squash(s: &str) -> String {
        s.trim().replace([' ', '\t', '\r', '\n'], "")
    }

    let mut hasher = Sha256::new();
    hasher.update(squash(module_tag).as_bytes());
    hasher.update([0x1f]);
    hasher.update(squash(locale).as_bytes());
    hasher.update([0x1f]);
    hasher.update(squash(question).as_bytes());
    for choice in choices {
        hasher.update([0x1f]);
        hasher.update(squash(choice).as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Normalize a raw import row into save input, or a per-row error message
pub fn normalize_row(raw: &ImportRow) -> Result<SaveItemInput, String> {
    let module_tag = raw
        .module_tag
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("module_tag is required")?;

    let question = raw
        .question
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("question is required")?;

    let choices: Vec<String> = raw
        .choices
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if choices.len() < 2 {
        return Err("at least two choices are required".to_string());
    }

    let correct_index = raw.correct_index.ok_or("correct_index is required")?;
    if correct_index < 0 || correct_index as usize >= choices.len() {
        return Err(format!(
            "correct_index {} out of range for {} choices",
            correct_index,
            choices.len()
        ));
    }

    let difficulty = raw.difficulty.unwrap_or(3);
    if !(1..=5).contains(&difficulty) {
        return Err(format!("difficulty {} out of range 1-5", difficulty));
    }

    let status = raw.status.clone().unwrap_or_else(|| "published".to_string());
    if status != "draft" && status != "published" {
        return Err(format!("unknown status '{}'", status));
    }

    Ok(SaveItemInput {
        id: None,
        expected_version: None,
        module_tag: module_tag.to_string(),
        locale: raw
            .locale
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("en")
            .to_string(),
        question: question.to_string(),
        choices,
        correct_index,
        difficulty,
        active: true,
        exam_candidate: raw.exam_candidate.unwrap_or(true),
        status,
        tags: raw.tags.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
    })
}

// ============================================================================
// Reads
// ============================================================================

/// Get item by ID
pub fn get_item(conn: &Connection, id: &str) -> Result<Option<ItemRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM items WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        let mut item = ItemRow::from_row(row)
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;
        item.tags = get_item_tags(conn, id)?;
        Ok(Some(item))
    } else {
        Ok(None)
    }
}

/// Find an item by its content hash (duplicate-import detection)
pub fn get_item_by_hash(conn: &Connection, hash: &str) -> Result<Option<ItemRow>, EngineError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM items WHERE content_hash = ?",
            params![hash],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(EngineError::Internal(format!("Query failed: {}", other))),
        })?;

    match id {
        Some(id) => get_item(conn, &id),
        None => Ok(None),
    }
}

/// Get tags for an item
fn get_item_tags(conn: &Connection, item_id: &str) -> Result<Vec<String>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT tag FROM item_tags WHERE item_id = ? ORDER BY tag")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let tags: Vec<String> = stmt
        .query_map(params![item_id], |row| row.get(0))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(tags)
}

/// List items with optional filters
pub fn list_items(conn: &Connection, query: &ItemQuery) -> Result<Vec<ItemRow>, EngineError> {
    let mut sql = String::from("SELECT DISTINCT i.* FROM items i");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(ref tag) = query.tag {
        sql.push_str(" INNER JOIN item_tags it ON i.id = it.item_id");
        conditions.push("it.tag = ?".to_string());
        params.push(Box::new(tag.clone()));
    }

    if let Some(ref module_tag) = query.module_tag {
        conditions.push("i.module_tag = ?".to_string());
        params.push(Box::new(module_tag.clone()));
    }

    if let Some(ref locale) = query.locale {
        conditions.push("i.locale = ?".to_string());
        params.push(Box::new(locale.clone()));
    }

    if let Some(active) = query.active {
        conditions.push("i.active = ?".to_string());
        params.push(Box::new(active as i64));
    }

    if let Some(ref status) = query.status {
        conditions.push("i.status = ?".to_string());
        params.push(Box::new(status.clone()));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY i.created_at DESC LIMIT ? OFFSET ?");
    params.push(Box::new(query.limit as i64));
    params.push(Box::new(query.offset as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| ItemRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    let mut results = vec![];
    for row_result in rows {
        let mut item = row_result
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;
        item.tags = get_item_tags(conn, &item.id)?;
        results.push(item);
    }

    Ok(results)
}

/// All active exam-candidate items for a locale (pool builder input)
pub fn list_exam_candidates(conn: &Connection, locale: &str) -> Result<Vec<ItemRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM items WHERE active = 1 AND exam_candidate = 1 AND locale = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![locale], |row| ItemRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    let mut results = vec![];
    for row_result in rows {
        let mut item = row_result
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;
        item.tags = get_item_tags(conn, &item.id)?;
        results.push(item);
    }

    Ok(results)
}

/// List revisions for an item, newest first
pub fn list_revisions(conn: &Connection, item_id: &str) -> Result<Vec<RevisionRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM item_revisions WHERE item_id = ? ORDER BY version DESC")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let revisions: Vec<RevisionRow> = stmt
        .query_map(params![item_id], |row| RevisionRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(revisions)
}

/// Get a single revision
pub fn get_revision(conn: &Connection, revision_id: &str) -> Result<Option<RevisionRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM item_revisions WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![revision_id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Ok(Some(RevisionRow::from_row(row)
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?))
    } else {
        Ok(None)
    }
}

// ============================================================================
// Writes
// ============================================================================

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Save an item. Inserts at version 1 when the id is new; otherwise
/// compare-and-swaps on `expected_version` and writes version + 1.
/// Exactly one revision row is appended either way.
pub fn save_item(conn: &mut Connection, input: SaveItemInput, editor: &str) -> Result<ItemRow, EngineError> {
    let now = current_timestamp();
    let hash = content_hash(&input.module_tag, &input.locale, &input.question, &input.choices);
    let choices_json = serde_json::to_string(&input.choices)?;

    let tx = conn.transaction()
        .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

    let existing = match input.id.as_deref() {
        Some(id) => get_item(&tx, id)?,
        None => None,
    };

    let saved = match existing {
        Some(current) => {
            let expected = input.expected_version.ok_or_else(|| {
                EngineError::Validation(
                    "expected_version is required when updating an existing item".to_string(),
                )
            })?;

            let changes = tx
                .execute(
                    r#"
                    UPDATE items SET
                        module_tag = ?, locale = ?, question = ?, choices_json = ?,
                        correct_index = ?, difficulty = ?, active = ?, exam_candidate = ?,
                        status = ?, version = ?, content_hash = ?, updated_at = ?
                    WHERE id = ? AND version = ?
                    "#,
                    params![
                        input.module_tag,
                        input.locale,
                        input.question,
                        choices_json,
                        input.correct_index,
                        input.difficulty,
                        input.active as i64,
                        input.exam_candidate as i64,
                        input.status,
                        expected + 1,
                        hash,
                        now,
                        current.id,
                        expected,
                    ],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        EngineError::DuplicateContent(format!(
                            "another item already carries content hash {}",
                            hash
                        ))
                    } else {
                        EngineError::Internal(format!("Update failed: {}", e))
                    }
                })?;

            if changes == 0 {
                return Err(EngineError::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }

            replace_tags(&tx, &current.id, &input.tags)?;

            let after = get_item(&tx, &current.id)?
                .ok_or_else(|| EngineError::Internal("Item not found after update".to_string()))?;
            insert_revision(&tx, &current.id, editor, "update", after.version, Some(&current), &after)?;
            after
        }
        None => {
            let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

            tx.execute(
                r#"
                INSERT INTO items (
                    id, module_tag, locale, question, choices_json, correct_index,
                    difficulty, active, exam_candidate, status, version, content_hash,
                    created_by, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
                "#,
                params![
                    id,
                    input.module_tag,
                    input.locale,
                    input.question,
                    choices_json,
                    input.correct_index,
                    input.difficulty,
                    input.active as i64,
                    input.exam_candidate as i64,
                    input.status,
                    hash,
                    editor,
                    now,
                    now,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EngineError::DuplicateContent(format!(
                        "an item already carries content hash {}",
                        hash
                    ))
                } else {
                    EngineError::Internal(format!("Insert failed: {}", e))
                }
            })?;

            replace_tags(&tx, &id, &input.tags)?;

            let after = get_item(&tx, &id)?
                .ok_or_else(|| EngineError::Internal("Item not found after insert".to_string()))?;
            insert_revision(&tx, &id, editor, "create", 1, None, &after)?;
            after
        }
    };

    tx.commit()
        .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;

    Ok(saved)
}

/// Revert an item to a revision's `before` snapshot. The snapshot's
/// editable fields are applied as a new save; the version counter only
/// ever moves forward.
pub fn revert_item(
    conn: &mut Connection,
    item_id: &str,
    revision_id: &str,
    editor: &str,
) -> Result<ItemRow, EngineError> {
    let now = current_timestamp();

    let tx = conn.transaction()
        .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

    let revision = get_revision(&tx, revision_id)?
        .ok_or_else(|| EngineError::NotFound(format!("revision {}", revision_id)))?;
    if revision.item_id != item_id {
        return Err(EngineError::Validation(
            "revision does not belong to this item".to_string(),
        ));
    }

    let snapshot: ItemRow = serde_json::from_str(&revision.before_json).map_err(|_| {
        EngineError::Validation("revision has no before snapshot to revert to".to_string())
    })?;

    let current = get_item(&tx, item_id)?
        .ok_or_else(|| EngineError::NotFound(format!("item {}", item_id)))?;

    let choices = snapshot.choices();
    let hash = content_hash(&snapshot.module_tag, &snapshot.locale, &snapshot.question, &choices);

    let changes = tx
        .execute(
            r#"
            UPDATE items SET
                module_tag = ?, locale = ?, question = ?, choices_json = ?,
                correct_index = ?, difficulty = ?, active = ?, exam_candidate = ?,
                status = ?, version = ?, content_hash = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
            params![
                snapshot.module_tag,
                snapshot.locale,
                snapshot.question,
                snapshot.choices_json,
                snapshot.correct_index,
                snapshot.difficulty,
                snapshot.active as i64,
                snapshot.exam_candidate as i64,
                snapshot.status,
                current.version + 1,
                hash,
                now,
                item_id,
                current.version,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                EngineError::DuplicateContent(format!(
                    "another item already carries content hash {}",
                    hash
                ))
            } else {
                EngineError::Internal(format!("Update failed: {}", e))
            }
        })?;

    if changes == 0 {
        return Err(EngineError::VersionConflict {
            expected: current.version,
            actual: current.version,
        });
    }

    replace_tags(&tx, item_id, &snapshot.tags)?;

    let after = get_item(&tx, item_id)?
        .ok_or_else(|| EngineError::Internal("Item not found after revert".to_string()))?;
    insert_revision(&tx, item_id, editor, "revert", after.version, Some(&current), &after)?;

    tx.commit()
        .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;

    Ok(after)
}

fn replace_tags(conn: &Connection, item_id: &str, tags: &[String]) -> Result<(), EngineError> {
    conn.execute("DELETE FROM item_tags WHERE item_id = ?", params![item_id])
        .map_err(|e| EngineError::Internal(format!("Tag delete failed: {}", e)))?;

    for tag in tags {
        conn.execute(
            "INSERT OR IGNORE INTO item_tags (item_id, tag) VALUES (?, ?)",
            params![item_id, tag],
        )
        .map_err(|e| EngineError::Internal(format!("Tag insert failed: {}", e)))?;
    }

    Ok(())
}

fn insert_revision(
    conn: &Connection,
    item_id: &str,
    editor: &str,
    action: &str,
    version: i64,
    before: Option<&ItemRow>,
    after: &ItemRow,
) -> Result<(), EngineError> {
    let before_json = match before {
        Some(row) => serde_json::to_string(row)?,
        None => "{}".to_string(),
    };
    let after_json = serde_json::to_string(after)?;

    conn.execute(
        r#"
        INSERT INTO item_revisions (id, item_id, editor, action, version, before_json, after_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            Uuid::new_v4().to_string(),
            item_id,
            editor,
            action,
            version,
            before_json,
            after_json,
            current_timestamp(),
        ],
    )
    .map_err(|e| EngineError::Internal(format!("Revision insert failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(question: &str) -> SaveItemInput {
        SaveItemInput {
            id: None,
            expected_version: None,
            module_tag: "hydraulics".to_string(),
            locale: "en".to_string(),
            question: question.to_string(),
            choices: vec!["Pump".to_string(), "Valve".to_string(), "Hose".to_string()],
            correct_index: 1,
            difficulty: 2,
            active: true,
            exam_candidate: true,
            status: "published".to_string(),
            tags: vec!["pressure".to_string()],
        }
    }

    fn open_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_content_hash_ignores_whitespace() {
        let a = content_hash("m", "en", "What  is\na pump?", &["A ".to_string(), "B".to_string()]);
        let b = content_hash("m", "en", "What is a pump?", &["A".to_string(), " B".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_sensitive_to_choice_order() {
        let a = content_hash("m", "en", "Q", &["A".to_string(), "B".to_string()]);
        let b = content_hash("m", "en", "Q", &["B".to_string(), "A".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_save_creates_version_one_and_revision() {
        let mut conn = open_conn();
        let item = save_item(&mut conn, sample_input("Q1"), "editor-1").unwrap();
        assert_eq!(item.version, 1);
        assert_eq!(item.tags, vec!["pressure".to_string()]);

        let revisions = list_revisions(&conn, &item.id).unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].action, "create");
        assert_eq!(revisions[0].version, 1);
        assert_eq!(revisions[0].before_json, "{}");
    }

    #[test]
    fn test_update_increments_version_with_cas() {
        let mut conn = open_conn();
        let item = save_item(&mut conn, sample_input("Q1"), "editor-1").unwrap();

        let mut update = sample_input("Q1 revised");
        update.id = Some(item.id.clone());
        update.expected_version = Some(item.version);
        let updated = save_item(&mut conn, update, "editor-2").unwrap();
        assert_eq!(updated.version, 2);

        // A second writer still holding version 1 must conflict
        let mut stale = sample_input("Q1 conflicting");
        stale.id = Some(item.id.clone());
        stale.expected_version = Some(1);
        let err = save_item(&mut conn, stale, "editor-3").unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict { expected: 1, actual: 2 }));

        // Exactly one revision per successful save
        let revisions = list_revisions(&conn, &item.id).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].action, "update");
    }

    #[test]
    fn test_revert_applies_before_snapshot_with_increasing_version() {
        let mut conn = open_conn();
        let item = save_item(&mut conn, sample_input("Original"), "editor-1").unwrap();

        let mut update = sample_input("Edited");
        update.id = Some(item.id.clone());
        update.expected_version = Some(1);
        save_item(&mut conn, update, "editor-1").unwrap();

        let update_revision = list_revisions(&conn, &item.id)
            .unwrap()
            .into_iter()
            .find(|r| r.action == "update")
            .unwrap();

        let reverted = revert_item(&mut conn, &item.id, &update_revision.id, "editor-1").unwrap();
        assert_eq!(reverted.question, "Original");
        assert_eq!(reverted.version, 3); // never rolls back

        let revisions = list_revisions(&conn, &item.id).unwrap();
        assert_eq!(revisions.len(), 3);
        assert_eq!(revisions[0].action, "revert");
    }

    #[test]
    fn test_revert_rejects_foreign_revision() {
        let mut conn = open_conn();
        let first = save_item(&mut conn, sample_input("Q1"), "editor-1").unwrap();
        let second = save_item(&mut conn, sample_input("Q2"), "editor-1").unwrap();

        let second_revision = &list_revisions(&conn, &second.id).unwrap()[0];
        let err = revert_item(&mut conn, &first.id, &second_revision.id, "editor-1").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_revert_rejects_create_revision() {
        let mut conn = open_conn();
        let item = save_item(&mut conn, sample_input("Q1"), "editor-1").unwrap();
        let create_revision = &list_revisions(&conn, &item.id).unwrap()[0];

        let err = revert_item(&mut conn, &item.id, &create_revision.id, "editor-1").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_duplicate_hash_rejected() {
        let mut conn = open_conn();
        save_item(&mut conn, sample_input("Q1"), "editor-1").unwrap();
        let err = save_item(&mut conn, sample_input("Q1"), "editor-1").unwrap_err();
        assert!(matches!(err, EngineError::DuplicateContent(_)));
    }

    #[test]
    fn test_normalize_row_validation() {
        let mut raw = ImportRow {
            module_tag: Some("safety".to_string()),
            question: Some("Q?".to_string()),
            choices: vec!["A".to_string(), "B".to_string()],
            correct_index: Some(1),
            ..Default::default()
        };
        assert!(normalize_row(&raw).is_ok());

        raw.correct_index = Some(5);
        assert!(normalize_row(&raw).unwrap_err().contains("out of range"));

        raw.correct_index = Some(0);
        raw.question = None;
        assert_eq!(normalize_row(&raw).unwrap_err(), "question is required");
    }
}
