//! Certificate service - eligibility gate, issuance, public verification
//!
//! Eligibility rules live in an external collaborator; this service only
//! consumes the verdict. Issuance is idempotent per (learner, course):
//! the live certificate is returned rather than duplicated, so retried
//! auto-issuance after a pass stays harmless.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::collaborators::EligibilityChecker;
use crate::db::attempts;
use crate::db::certificates::{self, CertificateRow, InsertCollision};
use crate::db::{current_timestamp, EngineDb};
use crate::error::EngineError;
use crate::exam::codes::{generate_code, normalize_code};
use crate::outbound::{OutboundQueue, OutboundTask};

use super::events::{EngineEvent, EventBus};

/// Attempts at generating a non-colliding verification code before
/// giving up
const CODE_RETRY_LIMIT: u32 = 5;

/// Minimal public projection returned by verify. Nothing beyond the
/// certificate's own public fields ever appears here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCertificate {
    pub course: String,
    pub score: Option<f64>,
    pub issued_at: String,
    pub learner_label: Option<String>,
}

/// Certificate service
pub struct CertificateService {
    db: Arc<EngineDb>,
    events: Arc<EventBus>,
    eligibility: Arc<dyn EligibilityChecker>,
    outbound: OutboundQueue,
    code_length: usize,
}

impl CertificateService {
    pub fn new(
        db: Arc<EngineDb>,
        events: Arc<EventBus>,
        eligibility: Arc<dyn EligibilityChecker>,
        outbound: OutboundQueue,
        code_length: usize,
    ) -> Self {
        Self {
            db,
            events,
            eligibility,
            outbound,
            code_length,
        }
    }

    /// Issue a certificate for a (learner, course). Returns the existing
    /// live certificate when one is already on file.
    pub fn issue(
        &self,
        learner: &str,
        learner_label: Option<&str>,
        course: &str,
        attempt_id: Option<&str>,
    ) -> Result<CertificateRow, EngineError> {
        if let Some(existing) = self
            .db
            .with_conn(|conn| certificates::find_live(conn, learner, course))?
        {
            return Ok(existing);
        }

        let outcome = self.eligibility.check(learner, course)?;
        if !outcome.eligible {
            return Err(EngineError::NotEligible {
                reasons: outcome.reasons,
            });
        }

        // Score comes from the passing attempt: the referenced one, or
        // the learner's latest pass for the course
        let attempt = self.db.with_conn(|conn| match attempt_id {
            Some(id) => attempts::get_attempt(conn, id),
            None => attempts::latest_passed_attempt(conn, learner, course),
        })?;
        let score = attempt.as_ref().and_then(|a| a.score);
        let attempt_ref = attempt.as_ref().map(|a| a.id.clone());

        let mut rng = StdRng::from_entropy();
        for _ in 0..CODE_RETRY_LIMIT {
            let code = generate_code(&mut rng, self.code_length);
            let id = uuid::Uuid::new_v4().to_string();
            let issued_at = current_timestamp();

            let inserted = self.db.with_conn(|conn| {
                certificates::insert_certificate(
                    conn,
                    &id,
                    learner,
                    learner_label,
                    course,
                    attempt_ref.as_deref(),
                    &code,
                    score,
                    &issued_at,
                )
            })?;

            match inserted {
                Ok(certificate) => {
                    info!(
                        certificate = %certificate.id,
                        learner = %learner,
                        course = %course,
                        "Certificate issued"
                    );
                    self.events.emit(EngineEvent::CertificateIssued {
                        id: certificate.id.clone(),
                        learner: learner.to_string(),
                        course: course.to_string(),
                    });
                    // Document rendering is an external, retryable effect
                    self.outbound.enqueue(OutboundTask::RenderDocument {
                        certificate_id: certificate.id.clone(),
                        course: course.to_string(),
                    });
                    return Ok(certificate);
                }
                Err(InsertCollision::CodeTaken) => {
                    warn!("Verification code collision, regenerating");
                    continue;
                }
                Err(InsertCollision::AlreadyIssued) => {
                    // Raced another issuance; return the winner
                    return self
                        .db
                        .with_conn(|conn| certificates::find_live(conn, learner, course))?
                        .ok_or_else(|| {
                            EngineError::Internal("Certificate vanished after collision".to_string())
                        });
                }
            }
        }

        Err(EngineError::Internal(
            "Could not generate a unique verification code".to_string(),
        ))
    }

    /// Public, unauthenticated lookup by verification code. Unknown and
    /// malformed codes are a not-found result, never an error.
    pub fn verify(&self, raw_code: &str) -> Result<Option<VerifiedCertificate>, EngineError> {
        let code = normalize_code(raw_code);
        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Ok(None);
        }

        let row = self.db.with_conn(|conn| certificates::find_by_code(conn, &code))?;

        Ok(row.map(|certificate| VerifiedCertificate {
            course: certificate.course,
            score: certificate.score,
            issued_at: certificate.issued_at,
            learner_label: certificate.learner_label,
        }))
    }

    /// Get certificate by ID (staff/internal)
    pub fn get(&self, id: &str) -> Result<Option<CertificateRow>, EngineError> {
        self.db.with_conn(|conn| certificates::get_certificate(conn, id))
    }

    /// Record the rendered document reference
    pub fn attach_document(&self, certificate_id: &str, document_ref: &str) -> Result<(), EngineError> {
        let updated = self
            .db
            .with_conn(|conn| certificates::set_document_ref(conn, certificate_id, document_ref))?;
        if !updated {
            return Err(EngineError::NotFound(format!("certificate {}", certificate_id)));
        }
        Ok(())
    }

    /// Revoke a certificate; its code stops verifying
    pub fn revoke(&self, certificate_id: &str) -> Result<(), EngineError> {
        let revoked = self
            .db
            .with_conn(|conn| certificates::revoke_certificate(conn, certificate_id))?;
        if !revoked {
            return Err(EngineError::NotFound(format!("certificate {}", certificate_id)));
        }

        self.events.emit(EngineEvent::CertificateRevoked {
            id: certificate_id.to_string(),
        });
        Ok(())
    }
}
