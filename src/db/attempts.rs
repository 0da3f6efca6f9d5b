//! Attempt rows: frozen question sets and the single terminal transition
//!
//! `question_ids_json` is written once at creation and never touched
//! again; grading always runs against this frozen list. The finalize
//! UPDATE is guarded on `status = 'in_progress'` so a second submission
//! (or a racing one) cannot overwrite a terminal attempt.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Attempt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Passed,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Passed => "passed",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(AttemptStatus::InProgress),
            "passed" => Some(AttemptStatus::Passed),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

/// Attempt row from database
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRow {
    pub id: String,
    pub learner: String,
    pub course: String,
    pub locale: String,
    pub question_ids_json: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub score: Option<f64>,
    pub correct_count: Option<i64>,
    pub total_count: Option<i64>,
    pub answers_json: Option<String>,
}

impl AttemptRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            learner: row.get("learner")?,
            course: row.get("course")?,
            locale: row.get("locale")?,
            question_ids_json: row.get("question_ids_json")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            score: row.get("score")?,
            correct_count: row.get("correct_count")?,
            total_count: row.get("total_count")?,
            answers_json: row.get("answers_json")?,
        })
    }

    /// The frozen question id list, in paper order
    pub fn question_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.question_ids_json).unwrap_or_default()
    }

    pub fn status(&self) -> AttemptStatus {
        AttemptStatus::parse(&self.status).unwrap_or(AttemptStatus::InProgress)
    }
}

/// Insert a new in-progress attempt with its frozen paper
pub fn create_attempt(
    conn: &Connection,
    id: &str,
    learner: &str,
    course: &str,
    locale: &str,
    question_ids: &[String],
    started_at: &str,
) -> Result<AttemptRow, EngineError> {
    let question_ids_json = serde_json::to_string(question_ids)?;

    conn.execute(
        r#"
        INSERT INTO attempts (id, learner, course, locale, question_ids_json, status, started_at)
        VALUES (?, ?, ?, ?, ?, 'in_progress', ?)
        "#,
        params![id, learner, course, locale, question_ids_json, started_at],
    )
    .map_err(|e| EngineError::Internal(format!("Insert failed: {}", e)))?;

    get_attempt(conn, id)?
        .ok_or_else(|| EngineError::Internal("Attempt not found after insert".to_string()))
}

/// Get attempt by ID
pub fn get_attempt(conn: &Connection, id: &str) -> Result<Option<AttemptRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM attempts WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Ok(Some(AttemptRow::from_row(row)
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?))
    } else {
        Ok(None)
    }
}

/// List a learner's attempts for a course, newest first
pub fn list_attempts(
    conn: &Connection,
    learner: &str,
    course: Option<&str>,
) -> Result<Vec<AttemptRow>, EngineError> {
    let mut sql = String::from("SELECT * FROM attempts WHERE learner = ?");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(learner.to_string())];

    if let Some(course) = course {
        sql.push_str(" AND course = ?");
        params.push(Box::new(course.to_string()));
    }
    sql.push_str(" ORDER BY started_at DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let attempts: Vec<AttemptRow> = stmt
        .query_map(param_refs.as_slice(), |row| AttemptRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(attempts)
}

/// Latest passed attempt for a (learner, course), if any
pub fn latest_passed_attempt(
    conn: &Connection,
    learner: &str,
    course: &str,
) -> Result<Option<AttemptRow>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM attempts WHERE learner = ? AND course = ? AND status = 'passed'
             ORDER BY finished_at DESC LIMIT 1",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![learner, course])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Ok(Some(AttemptRow::from_row(row)
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?))
    } else {
        Ok(None)
    }
}

/// Write the terminal state in one guarded update. Returns false when
/// the attempt was already terminal (the guard did not match).
#[allow(clippy::too_many_arguments)]
pub fn finalize_attempt(
    conn: &Connection,
    id: &str,
    status: AttemptStatus,
    finished_at: &str,
    score: f64,
    correct_count: i64,
    total_count: i64,
    answers_json: &str,
) -> Result<bool, EngineError> {
    let changes = conn
        .execute(
            r#"
            UPDATE attempts SET
                status = ?, finished_at = ?, score = ?,
                correct_count = ?, total_count = ?, answers_json = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
            params![
                status.as_str(),
                finished_at,
                score,
                correct_count,
                total_count,
                answers_json,
                id,
            ],
        )
        .map_err(|e| EngineError::Internal(format!("Finalize failed: {}", e)))?;

    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{}", i)).collect()
    }

    #[test]
    fn test_create_freezes_question_ids() {
        let conn = open_conn();
        let attempt = create_attempt(
            &conn, "a-1", "learner-1", "loader-cert", "en", &ids(3), "2026-01-01T00:00:00Z",
        )
        .unwrap();

        assert_eq!(attempt.status(), AttemptStatus::InProgress);
        assert_eq!(attempt.question_ids(), ids(3));
        assert!(attempt.finished_at.is_none());
    }

    #[test]
    fn test_finalize_is_single_shot() {
        let conn = open_conn();
        create_attempt(&conn, "a-1", "l", "c", "en", &ids(2), "2026-01-01T00:00:00Z").unwrap();

        let first = finalize_attempt(
            &conn, "a-1", AttemptStatus::Passed, "2026-01-01T00:10:00Z", 100.0, 2, 2, "[0,1]",
        )
        .unwrap();
        assert!(first);

        // The guard refuses a second finalize
        let second = finalize_attempt(
            &conn, "a-1", AttemptStatus::Failed, "2026-01-01T00:11:00Z", 0.0, 0, 2, "[1,0]",
        )
        .unwrap();
        assert!(!second);

        let row = get_attempt(&conn, "a-1").unwrap().unwrap();
        assert_eq!(row.status(), AttemptStatus::Passed);
        assert_eq!(row.score, Some(100.0));
    }

    #[test]
    fn test_latest_passed_attempt() {
        let conn = open_conn();
        create_attempt(&conn, "a-1", "l", "c", "en", &ids(1), "2026-01-01T00:00:00Z").unwrap();
        finalize_attempt(&conn, "a-1", AttemptStatus::Passed, "2026-01-01T01:00:00Z", 100.0, 1, 1, "[0]").unwrap();
        create_attempt(&conn, "a-2", "l", "c", "en", &ids(1), "2026-01-02T00:00:00Z").unwrap();
        finalize_attempt(&conn, "a-2", AttemptStatus::Failed, "2026-01-02T01:00:00Z", 0.0, 0, 1, "[1]").unwrap();

        let latest = latest_passed_attempt(&conn, "l", "c").unwrap().unwrap();
        assert_eq!(latest.id, "a-1");
        assert!(latest_passed_attempt(&conn, "l", "other").unwrap().is_none());
    }
}
