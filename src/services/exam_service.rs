//! Exam service - attempt state machine over blueprint, pool, and grader
//!
//! Attempt creation freezes the assembled paper; submission grades
//! against that frozen list and finalizes exactly once. Downstream
//! effects of a pass go through the outbound queue and never touch the
//! submit response.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::collaborators::{Identity, ModuleCatalog};
use crate::db::attempts::{self, AttemptRow, AttemptStatus};
use crate::db::blueprints::{self, BlueprintPolicy};
use crate::db::items::{self, ItemRow};
use crate::db::{current_timestamp, EngineDb};
use crate::error::EngineError;
use crate::exam::{assemble, build_pool, grade, GradeResult};
use crate::outbound::{OutboundQueue, OutboundTask};

use super::events::{EngineEvent, EventBus};

/// Result of a graded submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub grade: GradeResult,
    pub attempt: AttemptRow,
}

/// Exam service: blueprint resolution, pool building, paper assembly,
/// and the attempt lifecycle
pub struct ExamService {
    db: Arc<EngineDb>,
    events: Arc<EventBus>,
    catalog: Arc<dyn ModuleCatalog>,
    outbound: OutboundQueue,
    time_limit: Duration,
}

impl ExamService {
    pub fn new(
        db: Arc<EngineDb>,
        events: Arc<EventBus>,
        catalog: Arc<dyn ModuleCatalog>,
        outbound: OutboundQueue,
        time_limit: Duration,
    ) -> Self {
        Self {
            db,
            events,
            catalog,
            outbound,
            time_limit,
        }
    }

    /// Resolve the sampling policy for a (course, locale): the active
    /// blueprint, or the built-in default when none is configured
    pub fn resolve_policy(&self, course: &str, locale: &str) -> Result<BlueprintPolicy, EngineError> {
        let row = self
            .db
            .with_conn(|conn| blueprints::resolve_active(conn, course, locale))?;
        Ok(row.map(|r| r.policy()).unwrap_or_else(BlueprintPolicy::default_policy))
    }

    /// Create a timed attempt with a frozen paper
    pub fn create_attempt(
        &self,
        identity: &Identity,
        course: &str,
        locale: &str,
    ) -> Result<AttemptRow, EngineError> {
        self.create_attempt_with_rng(identity, course, locale, &mut StdRng::from_entropy())
    }

    /// Attempt creation with an injected rng (deterministic in tests)
    pub fn create_attempt_with_rng<R: Rng + ?Sized>(
        &self,
        identity: &Identity,
        course: &str,
        locale: &str,
        rng: &mut R,
    ) -> Result<AttemptRow, EngineError> {
        if course.trim().is_empty() {
            return Err(EngineError::Validation("course must not be empty".to_string()));
        }

        let policy = self.resolve_policy(course, locale)?;

        let linked = self.catalog.linked_module_tags(course)?;
        let catalog_tags = self.catalog.all_module_tags()?;
        let candidates = self
            .db
            .with_conn(|conn| items::list_exam_candidates(conn, locale))?;
        let pool = build_pool(&candidates, &linked, &catalog_tags);

        let question_ids = assemble(&policy, &pool, rng)?;

        let id = uuid::Uuid::new_v4().to_string();
        let started_at = current_timestamp();
        let attempt = self.db.with_conn(|conn| {
            attempts::create_attempt(
                conn,
                &id,
                &identity.subject,
                course,
                locale,
                &question_ids,
                &started_at,
            )
        })?;

        info!(
            attempt = %attempt.id,
            learner = %identity.subject,
            course = %course,
            questions = question_ids.len(),
            "Attempt created"
        );
        self.events.emit(EngineEvent::AttemptCreated {
            id: attempt.id.clone(),
            learner: identity.subject.clone(),
            course: course.to_string(),
        });

        Ok(attempt)
    }

    /// Grade a submission and finalize the attempt
    pub fn submit(
        &self,
        identity: &Identity,
        attempt_id: &str,
        answers: &[Option<i64>],
    ) -> Result<SubmitOutcome, EngineError> {
        let attempt = self
            .db
            .with_conn(|conn| attempts::get_attempt(conn, attempt_id))?
            .ok_or_else(|| EngineError::NotFound(format!("attempt {}", attempt_id)))?;

        if attempt.learner != identity.subject {
            return Err(EngineError::AuthorizationDenied(
                "attempt belongs to another learner".to_string(),
            ));
        }

        if attempt.status().is_terminal() {
            return Err(EngineError::AttemptClosed(
                "attempt is already finalized".to_string(),
            ));
        }

        // Server-side deadline; the caller's clock is never consulted
        if self.expired(&attempt)? {
            return Err(EngineError::AttemptClosed(
                "attempt time limit has elapsed".to_string(),
            ));
        }

        // Grade against the frozen question list, never a pool re-query
        let question_ids = attempt.question_ids();
        let paper: Vec<ItemRow> = self.db.with_conn(|conn| {
            question_ids
                .iter()
                .map(|qid| {
                    items::get_item(conn, qid)?.ok_or_else(|| {
                        EngineError::Internal(format!("attempt references missing item {}", qid))
                    })
                })
                .collect()
        })?;

        let result = grade(&paper, answers);
        let status = if result.passed {
            AttemptStatus::Passed
        } else {
            AttemptStatus::Failed
        };
        let finished_at = current_timestamp();
        let answers_json = serde_json::to_string(answers)?;

        let finalized = self.db.with_conn(|conn| {
            attempts::finalize_attempt(
                conn,
                attempt_id,
                status,
                &finished_at,
                result.score,
                result.correct_count,
                result.total_count,
                &answers_json,
            )
        })?;
        if !finalized {
            // A concurrent submission won the guarded update
            return Err(EngineError::AttemptClosed(
                "attempt is already finalized".to_string(),
            ));
        }

        let attempt = self
            .db
            .with_conn(|conn| attempts::get_attempt(conn, attempt_id))?
            .ok_or_else(|| EngineError::Internal("Attempt not found after finalize".to_string()))?;

        info!(
            attempt = %attempt.id,
            status = %attempt.status,
            score = result.score,
            "Attempt finalized"
        );
        self.events.emit(EngineEvent::AttemptFinalized {
            id: attempt.id.clone(),
            status: attempt.status.clone(),
            score: result.score,
        });

        if result.passed {
            self.outbound.enqueue(OutboundTask::IssueCertificate {
                learner: identity.subject.clone(),
                learner_label: identity.public_label(),
                course: attempt.course.clone(),
                attempt_id: attempt.id.clone(),
            });
            self.outbound.enqueue(OutboundTask::Notify {
                learner: identity.subject.clone(),
                subject: "Exam passed".to_string(),
                body: format!(
                    "You passed {} with a score of {:.0}%.",
                    attempt.course, result.score
                ),
            });
        }

        Ok(SubmitOutcome { grade: result, attempt })
    }

    /// Load an attempt for review; owner or staff only
    pub fn get_attempt(&self, identity: &Identity, attempt_id: &str) -> Result<AttemptRow, EngineError> {
        let attempt = self
            .db
            .with_conn(|conn| attempts::get_attempt(conn, attempt_id))?
            .ok_or_else(|| EngineError::NotFound(format!("attempt {}", attempt_id)))?;

        if attempt.learner != identity.subject && !identity.staff {
            return Err(EngineError::AuthorizationDenied(
                "attempt belongs to another learner".to_string(),
            ));
        }

        Ok(attempt)
    }

    fn expired(&self, attempt: &AttemptRow) -> Result<bool, EngineError> {
        let started: DateTime<Utc> = attempt
            .started_at
            .parse()
            .map_err(|e| EngineError::Internal(format!("Bad started_at timestamp: {}", e)))?;

        let deadline = started
            + chrono::Duration::from_std(self.time_limit)
                .map_err(|e| EngineError::Internal(format!("Bad time limit: {}", e)))?;

        if Utc::now() > deadline {
            warn!(attempt = %attempt.id, "Submission past the server-side deadline");
            return Ok(true);
        }
        Ok(false)
    }
}
