//! View types for the HTTP API boundary
//!
//! Wire/DB types stay snake_case; these views serialize camelCase for
//! clients. Stored JSON strings (choices, weights, answers) are parsed
//! into real values here so the storage format never leaks into the
//! API contract.
//!
//! The public verification projection lives with the certificate
//! service; everything in this module is behind an authenticated route.

use serde::Serialize;
use serde_json::Value;

use crate::db::attempts::AttemptRow;
use crate::db::blueprints::BlueprintRow;
use crate::db::items::{ImportOutcome, ItemRow, RevisionRow};
use crate::exam::GradeResult;
use crate::services::content_service::ImportRowResult;

/// Parse a JSON string to Value, returning null on parse failure.
fn parse_json(json_str: &str) -> Value {
    serde_json::from_str(json_str).unwrap_or(Value::Null)
}

// ============================================================================
// Item Views
// ============================================================================

/// Staff-facing item view; carries the correct index and therefore must
/// never be handed to learners or external collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: String,
    pub module_tag: String,
    pub locale: String,
    pub question: String,
    pub choices: Vec<String>,
    pub correct_index: i64,
    pub difficulty: i64,
    pub active: bool,
    pub exam_candidate: bool,
    pub status: String,
    pub version: i64,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ItemRow> for ItemView {
    fn from(item: ItemRow) -> Self {
        let choices = item.choices();
        Self {
            id: item.id,
            module_tag: item.module_tag,
            locale: item.locale,
            question: item.question,
            choices,
            correct_index: item.correct_index,
            difficulty: item.difficulty,
            active: item.active,
            exam_candidate: item.exam_candidate,
            status: item.status,
            version: item.version,
            content_hash: item.content_hash,
            tags: item.tags,
            created_by: item.created_by,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionView {
    pub id: String,
    pub item_id: String,
    pub editor: String,
    pub action: String,
    pub version: i64,
    pub before: Value,
    pub after: Value,
    pub created_at: String,
}

impl From<RevisionRow> for RevisionView {
    fn from(revision: RevisionRow) -> Self {
        Self {
            id: revision.id,
            item_id: revision.item_id,
            editor: revision.editor,
            action: revision.action,
            version: revision.version,
            before: parse_json(&revision.before_json),
            after: parse_json(&revision.after_json),
            created_at: revision.created_at,
        }
    }
}

/// Per-row import classification on the wire:
/// `inserted`, `skipped: duplicate`, or `error`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowView {
    pub row: usize,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ImportRowResult> for ImportRowView {
    fn from(result: ImportRowResult) -> Self {
        match result.outcome {
            ImportOutcome::Inserted { id } => Self {
                row: result.row,
                status: "inserted".to_string(),
                id: Some(id),
                existing_id: None,
                message: None,
            },
            ImportOutcome::Duplicate { existing_id } => Self {
                row: result.row,
                status: "skipped: duplicate".to_string(),
                id: None,
                existing_id: Some(existing_id),
                message: None,
            },
            ImportOutcome::Error { message } => Self {
                row: result.row,
                status: "error".to_string(),
                id: None,
                existing_id: None,
                message: Some(message),
            },
        }
    }
}

// ============================================================================
// Blueprint View
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintView {
    pub id: String,
    pub course: String,
    pub locale: String,
    pub question_count: u32,
    pub difficulty_weights: Value,
    pub tag_weights: Value,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<BlueprintRow> for BlueprintView {
    fn from(blueprint: BlueprintRow) -> Self {
        Self {
            id: blueprint.id,
            course: blueprint.course,
            locale: blueprint.locale,
            question_count: blueprint.question_count,
            difficulty_weights: parse_json(&blueprint.difficulty_weights_json),
            tag_weights: parse_json(&blueprint.tag_weights_json),
            active: blueprint.active,
            created_at: blueprint.created_at,
            updated_at: blueprint.updated_at,
        }
    }
}

// ============================================================================
// Attempt Views
// ============================================================================

/// Attempt view for the owning learner or staff. Question ids and the
/// raw submitted answers are included for review; correct indices never
/// appear here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub id: String,
    pub learner: String,
    pub course: String,
    pub locale: String,
    pub question_ids: Vec<String>,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub score: Option<f64>,
    pub correct_count: Option<i64>,
    pub total_count: Option<i64>,
    pub answers: Value,
}

impl From<AttemptRow> for AttemptView {
    fn from(attempt: AttemptRow) -> Self {
        let question_ids = attempt.question_ids();
        Self {
            id: attempt.id,
            learner: attempt.learner,
            course: attempt.course,
            locale: attempt.locale,
            question_ids,
            status: attempt.status,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            score: attempt.score,
            correct_count: attempt.correct_count,
            total_count: attempt.total_count,
            answers: attempt
                .answers_json
                .as_deref()
                .map(parse_json)
                .unwrap_or(Value::Null),
        }
    }
}

/// Response to attempt creation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptCreatedView {
    pub attempt_id: String,
    pub question_count: usize,
    pub started_at: String,
}

impl From<&AttemptRow> for AttemptCreatedView {
    fn from(attempt: &AttemptRow) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            question_count: attempt.question_ids().len(),
            started_at: attempt.started_at.clone(),
        }
    }
}

/// Compact attempt summary embedded in the submit response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummaryView {
    pub id: String,
    pub status: String,
    pub score: Option<f64>,
}

/// Response to a graded submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResultView {
    pub score: f64,
    pub correct_count: i64,
    pub total_count: i64,
    pub passed: bool,
    pub attempt: AttemptSummaryView,
}

impl SubmitResultView {
    pub fn new(grade: &GradeResult, attempt: &AttemptRow) -> Self {
        Self {
            score: grade.score,
            correct_count: grade.correct_count,
            total_count: grade.total_count,
            passed: grade.passed,
            attempt: AttemptSummaryView {
                id: attempt.id.clone(),
                status: attempt.status.clone(),
                score: attempt.score,
            },
        }
    }
}

// ============================================================================
// Certificate Views
// ============================================================================

/// Response to issuance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateIssuedView {
    pub certificate_id: String,
    pub verification_code: String,
}
