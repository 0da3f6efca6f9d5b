//! Certificate rows and verification-code lookup
//!
//! A partial unique index keeps at most one non-revoked certificate per
//! (learner, course); the verification code is globally unique.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::error::EngineError;

/// Certificate row from database
#[derive(Debug, Clone, Serialize)]
pub struct CertificateRow {
    pub id: String,
    pub learner: String,
    /// First-name-only label captured at issue time, safe for the
    /// public verification projection
    pub learner_label: Option<String>,
    pub course: String,
    pub attempt_id: Option<String>,
    pub verification_code: String,
    pub score: Option<f64>,
    pub issued_at: String,
    pub document_ref: Option<String>,
    pub revoked: bool,
}

impl CertificateRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            learner: row.get("learner")?,
            learner_label: row.get("learner_label")?,
            course: row.get("course")?,
            attempt_id: row.get("attempt_id")?,
            verification_code: row.get("verification_code")?,
            score: row.get("score")?,
            issued_at: row.get("issued_at")?,
            document_ref: row.get("document_ref")?,
            revoked: row.get::<_, i64>("revoked")? != 0,
        })
    }
}

/// How an insert collided, so the caller can pick the right recovery
#[derive(Debug)]
pub enum InsertCollision {
    /// The generated verification code is taken; regenerate and retry
    CodeTaken,
    /// A live certificate for this (learner, course) already exists
    AlreadyIssued,
}

/// Insert a certificate. Unique-constraint violations are reported as
/// collisions rather than errors; everything else is internal.
#[allow(clippy::too_many_arguments)]
pub fn insert_certificate(
    conn: &Connection,
    id: &str,
    learner: &str,
    learner_label: Option<&str>,
    course: &str,
    attempt_id: Option<&str>,
    verification_code: &str,
    score: Option<f64>,
    issued_at: &str,
) -> Result<Result<CertificateRow, InsertCollision>, EngineError> {
    let result = conn.execute(
        r#"
        INSERT INTO certificates (
            id, learner, learner_label, course, attempt_id,
            verification_code, score, issued_at, revoked
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
        "#,
        params![id, learner, learner_label, course, attempt_id, verification_code, score, issued_at],
    );

    match result {
        Ok(_) => {
            let row = get_certificate(conn, id)?.ok_or_else(|| {
                EngineError::Internal("Certificate not found after insert".to_string())
            })?;
            Ok(Ok(row))
        }
        Err(rusqlite::Error::SqliteFailure(err, message))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let detail = message.unwrap_or_default();
            if detail.contains("verification_code") {
                Ok(Err(InsertCollision::CodeTaken))
            } else {
                Ok(Err(InsertCollision::AlreadyIssued))
            }
        }
        Err(e) => Err(EngineError::Internal(format!("Insert failed: {}", e))),
    }
}

/// Get certificate by ID
pub fn get_certificate(conn: &Connection, id: &str) -> Result<Option<CertificateRow>, EngineError> {
    query_one(conn, "SELECT * FROM certificates WHERE id = ?", params![id])
}

/// The live (non-revoked) certificate for a (learner, course), if any
pub fn find_live(
    conn: &Connection,
    learner: &str,
    course: &str,
) -> Result<Option<CertificateRow>, EngineError> {
    query_one(
        conn,
        "SELECT * FROM certificates WHERE learner = ? AND course = ? AND revoked = 0",
        params![learner, course],
    )
}

/// Public lookup by verification code; revoked certificates do not resolve
pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<CertificateRow>, EngineError> {
    query_one(
        conn,
        "SELECT * FROM certificates WHERE verification_code = ? AND revoked = 0",
        params![code],
    )
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<CertificateRow>, EngineError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params)
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Ok(Some(CertificateRow::from_row(row)
            .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?))
    } else {
        Ok(None)
    }
}

/// Record the rendered document reference once the external renderer
/// completes
pub fn set_document_ref(conn: &Connection, id: &str, document_ref: &str) -> Result<bool, EngineError> {
    let changes = conn
        .execute(
            "UPDATE certificates SET document_ref = ? WHERE id = ?",
            params![document_ref, id],
        )
        .map_err(|e| EngineError::Internal(format!("Update failed: {}", e)))?;

    Ok(changes > 0)
}

/// Revoke a certificate; its code stops resolving and the
/// (learner, course) slot frees up
pub fn revoke_certificate(conn: &Connection, id: &str) -> Result<bool, EngineError> {
    let changes = conn
        .execute(
            "UPDATE certificates SET revoked = 1 WHERE id = ? AND revoked = 0",
            params![id],
        )
        .map_err(|e| EngineError::Internal(format!("Update failed: {}", e)))?;

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

    fn insert(conn: &Connection, id: &str, learner: &str, code: &str) -> Result<Result<CertificateRow, InsertCollision>, EngineError> {
        insert_certificate(
            conn, id, learner, Some("Ada"), "loader-cert", Some("a-1"), code, Some(92.0),
            "2026-01-01T00:00:00Z",
        )
    }

    #[test]
    fn test_insert_and_find_by_code() {
        let conn = open_conn();
        let row = insert(&conn, "c-1", "learner-1", "ABCDE23456").unwrap().unwrap();
        assert_eq!(row.verification_code, "ABCDE23456");

        let found = find_by_code(&conn, "ABCDE23456").unwrap().unwrap();
        assert_eq!(found.id, "c-1");
        assert!(find_by_code(&conn, "UNKNOWN").unwrap().is_none());
    }

    #[test]
    fn test_code_collision_reported() {
        let conn = open_conn();
        insert(&conn, "c-1", "learner-1", "SAMECODE22").unwrap().unwrap();
        let collision = insert(&conn, "c-2", "learner-2", "SAMECODE22").unwrap().unwrap_err();
        assert!(matches!(collision, InsertCollision::CodeTaken));
    }

    #[test]
    fn test_one_live_certificate_per_learner_course() {
        let conn = open_conn();
        insert(&conn, "c-1", "learner-1", "CODE111111").unwrap().unwrap();
        let collision = insert(&conn, "c-2", "learner-1", "CODE222222").unwrap().unwrap_err();
        assert!(matches!(collision, InsertCollision::AlreadyIssued));

        // Revoking frees the slot and kills the code
        assert!(revoke_certificate(&conn, "c-1").unwrap());
        assert!(find_by_code(&conn, "CODE111111").unwrap().is_none());
        insert(&conn, "c-3", "learner-1", "CODE333333").unwrap().unwrap();
    }

    #[test]
    fn test_document_ref_attach() {
        let conn = open_conn();
        insert(&conn, "c-1", "learner-1", "CODE111111").unwrap().unwrap();
        assert!(set_document_ref(&conn, "c-1", "doc://rendered/c-1.pdf").unwrap());
        let row = get_certificate(&conn, "c-1").unwrap().unwrap();
        assert_eq!(row.document_ref.as_deref(), Some("doc://rendered/c-1.pdf"));
    }
}
