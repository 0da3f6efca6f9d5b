//! Blueprint rows and active-policy resolution
//!
//! A blueprint is the sampling policy for one (course, locale): how many
//! questions to draw and the target fractions per difficulty and per tag.
//! Only the active row per pair matters to the assembler.

use std::collections::HashMap;

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::current_timestamp;
use crate::error::EngineError;

/// Default question count when no blueprint is configured
pub const DEFAULT_QUESTION_COUNT: u32 = 20;

/// Blueprint row from database
#[derive(Debug, Clone, Serialize)]
pub struct BlueprintRow {
    pub id: String,
    pub course: String,
    pub locale: String,
    pub question_count: u32,
    pub difficulty_weights_json: String,
    pub tag_weights_json: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl BlueprintRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            course: row.get("course")?,
            locale: row.get("locale")?,
            question_count: row.get::<_, i64>("question_count")? as u32,
            difficulty_weights_json: row.get("difficulty_weights_json")?,
            tag_weights_json: row.get("tag_weights_json")?,
            active: row.get::<_, i64>("active")? != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Resolve into the policy the assembler consumes
    pub fn policy(&self) -> BlueprintPolicy {
        let difficulty_raw: HashMap<String, f64> =
            serde_json::from_str(&self.difficulty_weights_json).unwrap_or_default();
        let difficulty_weights = difficulty_raw
            .into_iter()
            .filter_map(|(k, v)| k.parse::<i64>().ok().map(|d| (d, v)))
            .collect();

        BlueprintPolicy {
            question_count: self.question_count as usize,
            difficulty_weights,
            tag_weights: serde_json::from_str(&self.tag_weights_json).unwrap_or_default(),
        }
    }
}

/// Sampling policy consumed by the paper assembler
#[derive(Debug, Clone)]
pub struct BlueprintPolicy {
    pub question_count: usize,
    /// difficulty (1-5) -> target fraction of the paper
    pub difficulty_weights: HashMap<i64, f64>,
    /// topic tag -> target fraction of the paper
    pub tag_weights: HashMap<String, f64>,
}

impl BlueprintPolicy {
    /// Built-in policy when no blueprint is configured: fixed count,
    /// empty weight maps, so the whole paper fills uniformly.
    pub fn default_policy() -> Self {
        Self {
            question_count: DEFAULT_QUESTION_COUNT as usize,
            difficulty_weights: HashMap::new(),
            tag_weights: HashMap::new(),
        }
    }
}

/// Input for creating/replacing the active blueprint of a (course, locale)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertBlueprintInput {
    pub course: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub question_count: u32,
    #[serde(default)]
    pub difficulty_weights: HashMap<String, f64>,
    #[serde(default)]
    pub tag_weights: HashMap<String, f64>,
}

fn default_locale() -> String { "en".to_string() }

/// Get the active blueprint for a (course, locale), if configured
pub fn resolve_active(
    conn: &Connection,
    course: &str,
    locale: &str,
) -> Result<Option<BlueprintRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM blueprints WHERE course = ? AND locale = ? AND active = 1")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![course, locale])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Ok(Some(BlueprintRow::from_row(row)
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?))
    } else {
        Ok(None)
    }
}

/// List blueprints, optionally scoped to a course (active and retired)
pub fn list_blueprints(conn: &Connection, course: Option<&str>) -> Result<Vec<BlueprintRow>, EngineError> {
    let mut sql = String::from("SELECT * FROM blueprints");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if let Some(course) = course {
        sql.push_str(" WHERE course = ?");
        params.push(Box::new(course.to_string()));
    }
    sql.push_str(" ORDER BY course, locale, active DESC, updated_at DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let blueprints: Vec<BlueprintRow> = stmt
        .query_map(param_refs.as_slice(), |row| BlueprintRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(blueprints)
}

/// Replace the active blueprint for a (course, locale). The previous
/// active row is retired, not deleted, in the same transaction.
pub fn upsert_blueprint(
    conn: &mut Connection,
    input: UpsertBlueprintInput,
) -> Result<BlueprintRow, EngineError> {
    let now = current_timestamp();
    let id = Uuid::new_v4().to_string();

    let tx = conn.transaction()
        .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

    tx.execute(
        "UPDATE blueprints SET active = 0, updated_at = ? WHERE course = ? AND locale = ? AND active = 1",
        params![now, input.course, input.locale],
    )
    .map_err(|e| EngineError::Internal(format!("Retire failed: {}", e)))?;

    tx.execute(
        r#"
        INSERT INTO blueprints (
            id, course, locale, question_count,
            difficulty_weights_json, tag_weights_json, active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
        params![
            id,
            input.course,
            input.locale,
            input.question_count,
            serde_json::to_string(&input.difficulty_weights)?,
            serde_json::to_string(&input.tag_weights)?,
            now,
            now,
        ],
    )
    .map_err(|e| EngineError::Internal(format!("Insert failed: {}", e)))?;

    tx.commit()
        .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;

    resolve_active(conn, &input.course, &input.locale)?
        .ok_or_else(|| EngineError::Internal("Blueprint not found after insert".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn sample_input(count: u32) -> UpsertBlueprintInput {
        UpsertBlueprintInput {
            course: "loader-cert".to_string(),
            locale: "en".to_string(),
            question_count: count,
            difficulty_weights: HashMap::from([("2".to_string(), 0.5)]),
            tag_weights: HashMap::from([("safety".to_string(), 0.25)]),
        }
    }

    #[test]
    fn test_upsert_retires_previous_active() {
        let mut conn = open_conn();
        upsert_blueprint(&mut conn, sample_input(10)).unwrap();
        let replacement = upsert_blueprint(&mut conn, sample_input(30)).unwrap();

        let active = resolve_active(&conn, "loader-cert", "en").unwrap().unwrap();
        assert_eq!(active.id, replacement.id);
        assert_eq!(active.question_count, 30);

        let all = list_blueprints(&conn, Some("loader-cert")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|b| b.active).count(), 1);
    }

    #[test]
    fn test_policy_parses_weight_maps() {
        let mut conn = open_conn();
        let row = upsert_blueprint(&mut conn, sample_input(10)).unwrap();
        let policy = row.policy();
        assert_eq!(policy.question_count, 10);
        assert_eq!(policy.difficulty_weights.get(&2), Some(&0.5));
        assert_eq!(policy.tag_weights.get("safety"), Some(&0.25));
    }

    #[test]
    fn test_resolve_missing_returns_none() {
        let conn = open_conn();
        assert!(resolve_active(&conn, "unknown", "en").unwrap().is_none());
    }
}
