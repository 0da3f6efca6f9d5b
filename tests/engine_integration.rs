//! Integration tests for the assessment engine
//!
//! Drives the service layer over an in-memory SQLite database with
//! stubbed collaborators, exercising the full pipeline: import ->
//! blueprint -> pool -> attempt -> grading -> certificate -> public
//! verification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use proctor::collaborators::{
    EligibilityChecker, EligibilityOutcome, Identity, ModuleCatalog,
};
use proctor::db::blueprints::{self, UpsertBlueprintInput};
use proctor::db::items::{ImportOutcome, ImportRow, SaveItemInput};
use proctor::error::EngineError;
use proctor::outbound::OutboundTask;
use proctor::{EngineDb, OutboundQueue, Services};

const COURSE: &str = "loader-cert";
const MODULE: &str = "hydraulics";

struct TestCatalog;

impl ModuleCatalog for TestCatalog {
    fn linked_module_tags(&self, course: &str) -> Result<HashSet<String>, EngineError> {
        if course == COURSE {
            Ok(HashSet::from([MODULE.to_string()]))
        } else {
            Ok(HashSet::new())
        }
    }

    fn all_module_tags(&self) -> Result<HashSet<String>, EngineError> {
        Ok(HashSet::from([MODULE.to_string(), "electrics".to_string()]))
    }
}

struct AlwaysEligible;

impl EligibilityChecker for AlwaysEligible {
    fn check(&self, _learner: &str, _course: &str) -> Result<EligibilityOutcome, EngineError> {
        Ok(EligibilityOutcome { eligible: true, reasons: vec![] })
    }
}

struct NeverEligible;

impl EligibilityChecker for NeverEligible {
    fn check(&self, _learner: &str, _course: &str) -> Result<EligibilityOutcome, EngineError> {
        Ok(EligibilityOutcome {
            eligible: false,
            reasons: vec!["enrollment incomplete".to_string()],
        })
    }
}

fn test_services_with(
    eligibility: Arc<dyn EligibilityChecker>,
    time_limit: Duration,
) -> (Arc<Services>, tokio::sync::mpsc::UnboundedReceiver<OutboundTask>) {
    let db = Arc::new(EngineDb::open_in_memory().unwrap());
    let (outbound, rx) = OutboundQueue::new();
    let services = Services::new(
        db,
        Arc::new(TestCatalog),
        eligibility,
        outbound,
        time_limit,
        10,
    );
    (Arc::new(services), rx)
}

fn test_services() -> (Arc<Services>, tokio::sync::mpsc::UnboundedReceiver<OutboundTask>) {
    test_services_with(Arc::new(AlwaysEligible), Duration::from_secs(3600))
}

fn learner(subject: &str) -> Identity {
    Identity {
        subject: subject.to_string(),
        display_name: Some(format!("{} Lovelace", subject)),
        staff: false,
    }
}

fn item_input(question: &str, correct_index: i64) -> SaveItemInput {
    SaveItemInput {
        id: None,
        expected_version: None,
        module_tag: MODULE.to_string(),
        locale: "en".to_string(),
        question: question.to_string(),
        choices: vec!["A".to_string(), "B".to_string(), "C".to_string()],
        correct_index,
        difficulty: 3,
        active: true,
        exam_candidate: true,
        status: "published".to_string(),
        tags: vec![],
    }
}

fn seed_items(services: &Services, count: usize) {
    for i in 0..count {
        services
            .content
            .save(item_input(&format!("Question {}?", i), 0), "seeder")
            .unwrap();
    }
}

fn set_blueprint(services: &Services, question_count: u32) {
    services
        .db
        .with_conn_mut(|conn| {
            blueprints::upsert_blueprint(
                conn,
                UpsertBlueprintInput {
                    course: COURSE.to_string(),
                    locale: "en".to_string(),
                    question_count,
                    difficulty_weights: HashMap::new(),
                    tag_weights: HashMap::new(),
                },
            )
        })
        .unwrap();
}

fn import_row(question: &str) -> ImportRow {
    ImportRow {
        module_tag: Some(MODULE.to_string()),
        locale: Some("en".to_string()),
        question: Some(question.to_string()),
        choices: vec!["A".to_string(), "B".to_string()],
        correct_index: Some(0),
        difficulty: Some(2),
        tags: vec!["pressure".to_string()],
        exam_candidate: Some(true),
        status: Some("published".to_string()),
    }
}

// ============================================================================
// Import
// ============================================================================

#[test]
fn importing_same_row_twice_stores_one_item() {
    let (services, _rx) = test_services();

    let first = services
        .content
        .import(vec![import_row("What is a pump?")], false, "staff-1")
        .unwrap();
    assert!(matches!(first[0].outcome, ImportOutcome::Inserted { .. }));

    // Second import of the identical row reports a duplicate, no write
    let second = services
        .content
        .import(vec![import_row("What is a pump?")], false, "staff-1")
        .unwrap();
    assert!(matches!(second[0].outcome, ImportOutcome::Duplicate { .. }));

    assert_eq!(services.db.stats().unwrap().item_count, 1);
}

#[test]
fn import_detects_duplicates_within_one_batch() {
    let (services, _rx) = test_services();

    let results = services
        .content
        .import(
            vec![import_row("Same question"), import_row("Same  question")],
            false,
            "staff-1",
        )
        .unwrap();

    assert!(matches!(results[0].outcome, ImportOutcome::Inserted { .. }));
    // Whitespace differences hash identically
    assert!(matches!(results[1].outcome, ImportOutcome::Duplicate { .. }));
    assert_eq!(services.db.stats().unwrap().item_count, 1);
}

#[test]
fn dry_run_classifies_without_writing() {
    let (services, _rx) = test_services();
    services
        .content
        .import(vec![import_row("Existing")], false, "staff-1")
        .unwrap();

    let results = services
        .content
        .import(
            vec![
                import_row("Existing"),
                import_row("Brand new"),
                ImportRow::default(), // malformed
            ],
            true,
            "staff-1",
        )
        .unwrap();

    assert!(matches!(results[0].outcome, ImportOutcome::Duplicate { .. }));
    assert!(matches!(results[1].outcome, ImportOutcome::Inserted { .. }));
    assert!(matches!(results[2].outcome, ImportOutcome::Error { .. }));

    // Nothing was written
    assert_eq!(services.db.stats().unwrap().item_count, 1);
}

#[test]
fn malformed_row_does_not_abort_batch() {
    let (services, _rx) = test_services();

    let results = services
        .content
        .import(
            vec![ImportRow::default(), import_row("Valid question")],
            false,
            "staff-1",
        )
        .unwrap();

    assert!(matches!(results[0].outcome, ImportOutcome::Error { .. }));
    assert!(matches!(results[1].outcome, ImportOutcome::Inserted { .. }));
    assert_eq!(services.db.stats().unwrap().item_count, 1);
}

// ============================================================================
// Attempt creation
// ============================================================================

#[test]
fn attempt_draws_exact_count_from_pool() {
    let (services, _rx) = test_services();
    seed_items(&services, 25);
    set_blueprint(&services, 20);

    let attempt = services
        .exam
        .create_attempt_with_rng(&learner("l-1"), COURSE, "en", &mut StdRng::seed_from_u64(7))
        .unwrap();

    let ids = attempt.question_ids();
    assert_eq!(ids.len(), 20);
    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), 20);
}

#[test]
fn insufficient_pool_creates_no_attempt() {
    let (services, _rx) = test_services();
    seed_items(&services, 5);
    set_blueprint(&services, 20);

    let err = services
        .exam
        .create_attempt_with_rng(&learner("l-1"), COURSE, "en", &mut StdRng::seed_from_u64(7))
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::InsufficientPool { required: 20, available: 5 }
    ));
    assert_eq!(services.db.stats().unwrap().attempt_count, 0);
}

#[test]
fn default_policy_applies_when_no_blueprint_configured() {
    let (services, _rx) = test_services();
    seed_items(&services, 30);
    // No blueprint row: the built-in default count of 20 applies

    let attempt = services
        .exam
        .create_attempt_with_rng(&learner("l-1"), COURSE, "en", &mut StdRng::seed_from_u64(1))
        .unwrap();
    assert_eq!(attempt.question_ids().len(), 20);
}

#[test]
fn orphan_items_stay_in_the_pool() {
    let (services, _rx) = test_services();
    set_blueprint(&services, 2);

    // One linked item, one orphan (module tag unknown to the catalog),
    // one item from a real-but-unlinked module
    services.content.save(item_input("Linked?", 0), "seeder").unwrap();
    let mut orphan = item_input("Orphan?", 0);
    orphan.module_tag = "legacy-module".to_string();
    services.content.save(orphan, "seeder").unwrap();
    let mut unlinked = item_input("Unlinked?", 0);
    unlinked.module_tag = "electrics".to_string();
    services.content.save(unlinked, "seeder").unwrap();

    let attempt = services
        .exam
        .create_attempt_with_rng(&learner("l-1"), COURSE, "en", &mut StdRng::seed_from_u64(2))
        .unwrap();

    // Pool is exactly the linked item plus the orphan; the unlinked
    // "electrics" item is excluded, so assembly of 2 must use both
    let ids = attempt.question_ids();
    assert_eq!(ids.len(), 2);
}

// ============================================================================
// Submission and grading
// ============================================================================

#[test]
fn submit_grades_against_frozen_paper() {
    let (services, _rx) = test_services();
    set_blueprint(&services, 3);

    // Three items with correct indices 1, 0, 2
    services.content.save(item_input("Q-a?", 1), "seeder").unwrap();
    services.content.save(item_input("Q-b?", 0), "seeder").unwrap();
    services.content.save(item_input("Q-c?", 2), "seeder").unwrap();

    let who = learner("l-1");
    let attempt = services
        .exam
        .create_attempt_with_rng(&who, COURSE, "en", &mut StdRng::seed_from_u64(3))
        .unwrap();

    // Answering 0 everywhere hits exactly the one item whose correct
    // index is 0, in any paper order
    let outcome = services
        .exam
        .submit(&who, &attempt.id, &[Some(0), Some(0), Some(0)])
        .unwrap();

    assert_eq!(outcome.grade.correct_count, 1);
    assert_eq!(outcome.grade.total_count, 3);
    assert!((outcome.grade.score - 100.0 / 3.0).abs() < 0.01);
    assert!(!outcome.grade.passed);
    assert_eq!(outcome.attempt.status, "failed");
    assert!(outcome.attempt.finished_at.is_some());
}

#[test]
fn submit_requires_the_owning_learner() {
    let (services, _rx) = test_services();
    seed_items(&services, 3);
    set_blueprint(&services, 3);

    let attempt = services
        .exam
        .create_attempt_with_rng(&learner("l-1"), COURSE, "en", &mut StdRng::seed_from_u64(4))
        .unwrap();

    let err = services
        .exam
        .submit(&learner("l-2"), &attempt.id, &[Some(0)])
        .unwrap_err();
    assert!(matches!(err, EngineError::AuthorizationDenied(_)));

    let err = services
        .exam
        .submit(&learner("l-1"), "no-such-attempt", &[Some(0)])
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn terminal_attempt_rejects_resubmission() {
    let (services, _rx) = test_services();
    seed_items(&services, 3);
    set_blueprint(&services, 3);

    let who = learner("l-1");
    let attempt = services
        .exam
        .create_attempt_with_rng(&who, COURSE, "en", &mut StdRng::seed_from_u64(5))
        .unwrap();

    services.exam.submit(&who, &attempt.id, &[Some(0), Some(0), Some(0)]).unwrap();

    let err = services
        .exam
        .submit(&who, &attempt.id, &[Some(0), Some(0), Some(0)])
        .unwrap_err();
    assert!(matches!(err, EngineError::AttemptClosed(_)));
}

#[test]
fn expired_attempt_rejects_submission() {
    // Zero time limit: every submission is past the server-side deadline
    let (services, _rx) = test_services_with(Arc::new(AlwaysEligible), Duration::from_secs(0));
    seed_items(&services, 3);
    set_blueprint(&services, 3);

    let who = learner("l-1");
    let attempt = services
        .exam
        .create_attempt_with_rng(&who, COURSE, "en", &mut StdRng::seed_from_u64(6))
        .unwrap();

    std::thread::sleep(Duration::from_millis(1100));

    let err = services
        .exam
        .submit(&who, &attempt.id, &[Some(0), Some(0), Some(0)])
        .unwrap_err();
    assert!(matches!(err, EngineError::AttemptClosed(_)));

    // The attempt stays in progress; nothing was finalized
    let row = services.exam.get_attempt(&who, &attempt.id).unwrap();
    assert_eq!(row.status, "in_progress");
}

#[test]
fn malformed_answer_arrays_score_low_never_error() {
    let (services, _rx) = test_services();
    seed_items(&services, 3);
    set_blueprint(&services, 3);

    let who = learner("l-1");
    let attempt = services
        .exam
        .create_attempt_with_rng(&who, COURSE, "en", &mut StdRng::seed_from_u64(8))
        .unwrap();

    // Too short, with an out-of-range index and a null
    let outcome = services
        .exam
        .submit(&who, &attempt.id, &[Some(99), None])
        .unwrap();
    assert_eq!(outcome.grade.correct_count, 0);
    assert_eq!(outcome.grade.total_count, 3);
    assert!(!outcome.grade.passed);
}

#[test]
fn passing_submission_queues_issuance_and_notification() {
    let (services, mut rx) = test_services();
    set_blueprint(&services, 2);
    services.content.save(item_input("Q-a?", 1), "seeder").unwrap();
    services.content.save(item_input("Q-b?", 1), "seeder").unwrap();

    let who = learner("Ada");
    let attempt = services
        .exam
        .create_attempt_with_rng(&who, COURSE, "en", &mut StdRng::seed_from_u64(9))
        .unwrap();

    let outcome = services
        .exam
        .submit(&who, &attempt.id, &[Some(1), Some(1)])
        .unwrap();
    assert!(outcome.grade.passed);
    assert_eq!(outcome.attempt.status, "passed");

    let first = rx.try_recv().unwrap();
    assert!(matches!(first, OutboundTask::IssueCertificate { .. }));
    let second = rx.try_recv().unwrap();
    assert!(matches!(second, OutboundTask::Notify { .. }));
}

// ============================================================================
// Content versioning
// ============================================================================

#[test]
fn save_and_revert_keep_versions_increasing() {
    let (services, _rx) = test_services();

    let item = services.content.save(item_input("Original?", 0), "staff-1").unwrap();
    assert_eq!(item.version, 1);

    let mut update = item_input("Edited?", 0);
    update.id = Some(item.id.clone());
    update.expected_version = Some(1);
    let updated = services.content.save(update, "staff-1").unwrap();
    assert_eq!(updated.version, 2);

    let revisions = services.content.revisions(&item.id).unwrap();
    assert_eq!(revisions.len(), 2);

    let update_revision = revisions.iter().find(|r| r.action == "update").unwrap();
    let reverted = services
        .content
        .revert(&item.id, &update_revision.id, "staff-1")
        .unwrap();
    assert_eq!(reverted.question, "Original?");
    assert_eq!(reverted.version, 3);

    // One revision per mutation, never fewer
    assert_eq!(services.content.revisions(&item.id).unwrap().len(), 3);
}

#[test]
fn concurrent_editors_conflict_instead_of_losing_writes() {
    let (services, _rx) = test_services();
    let item = services.content.save(item_input("Shared?", 0), "staff-1").unwrap();

    // Both editors read version 1; the first save wins
    let mut first = item_input("First edit?", 0);
    first.id = Some(item.id.clone());
    first.expected_version = Some(1);
    services.content.save(first, "editor-a").unwrap();

    let mut second = item_input("Second edit?", 0);
    second.id = Some(item.id.clone());
    second.expected_version = Some(1);
    let err = services.content.save(second, "editor-b").unwrap_err();
    assert!(matches!(err, EngineError::VersionConflict { expected: 1, actual: 2 }));
}

// ============================================================================
// Certificates
// ============================================================================

fn pass_course(services: &Services, who: &Identity) {
    set_blueprint(services, 2);
    services.content.save(item_input("Q-a?", 1), "seeder").unwrap();
    services.content.save(item_input("Q-b?", 1), "seeder").unwrap();
    let attempt = services
        .exam
        .create_attempt_with_rng(who, COURSE, "en", &mut StdRng::seed_from_u64(10))
        .unwrap();
    services.exam.submit(who, &attempt.id, &[Some(1), Some(1)]).unwrap();
}

#[test]
fn issuance_is_idempotent_per_learner_and_course() {
    let (services, _rx) = test_services();
    let who = learner("Ada");
    pass_course(&services, &who);

    let first = services
        .certificate
        .issue(&who.subject, Some("Ada"), COURSE, None)
        .unwrap();
    let second = services
        .certificate
        .issue(&who.subject, Some("Ada"), COURSE, None)
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.verification_code, second.verification_code);
    assert_eq!(services.db.stats().unwrap().certificate_count, 1);

    // Score carried over from the passing attempt
    assert_eq!(first.score, Some(100.0));
}

#[test]
fn ineligible_learner_is_refused_with_reasons() {
    let (services, _rx) = test_services_with(Arc::new(NeverEligible), Duration::from_secs(3600));

    let err = services
        .certificate
        .issue("l-1", None, COURSE, None)
        .unwrap_err();
    match err {
        EngineError::NotEligible { reasons } => {
            assert_eq!(reasons, vec!["enrollment incomplete".to_string()]);
        }
        other => panic!("expected NotEligible, got {:?}", other),
    }
}

#[test]
fn verify_returns_minimal_public_projection() {
    let (services, _rx) = test_services();
    let who = learner("Ada");
    pass_course(&services, &who);

    let certificate = services
        .certificate
        .issue(&who.subject, who.public_label().as_deref(), COURSE, None)
        .unwrap();

    let verified = services
        .certificate
        .verify(&certificate.verification_code)
        .unwrap()
        .unwrap();
    assert_eq!(verified.course, COURSE);
    assert_eq!(verified.score, Some(100.0));
    assert_eq!(verified.learner_label.as_deref(), Some("Ada"));

    // The projection carries only public certificate fields: no learner
    // id, no item data, no correct indices
    let json = serde_json::to_value(&verified).unwrap();
    let keys: HashSet<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
    assert_eq!(
        keys,
        HashSet::from(["course", "score", "issuedAt", "learnerLabel"])
    );

    // Lookup is case/whitespace tolerant
    let relaxed = format!("  {}  ", certificate.verification_code.to_lowercase());
    assert!(services.certificate.verify(&relaxed).unwrap().is_some());
}

#[test]
fn verify_unknown_or_malformed_codes_is_not_found_not_error() {
    let (services, _rx) = test_services();

    assert!(services.certificate.verify("NOPE123456").unwrap().is_none());
    assert!(services.certificate.verify("").unwrap().is_none());
    assert!(services.certificate.verify("../../etc/passwd").unwrap().is_none());
}

#[test]
fn revoked_certificates_stop_verifying() {
    let (services, _rx) = test_services();
    let who = learner("Ada");
    pass_course(&services, &who);

    let certificate = services
        .certificate
        .issue(&who.subject, None, COURSE, None)
        .unwrap();
    services.certificate.revoke(&certificate.id).unwrap();

    assert!(services
        .certificate
        .verify(&certificate.verification_code)
        .unwrap()
        .is_none());
}

#[test]
fn document_ref_is_attached_after_rendering() {
    let (services, _rx) = test_services();
    let who = learner("Ada");
    pass_course(&services, &who);

    let certificate = services
        .certificate
        .issue(&who.subject, None, COURSE, None)
        .unwrap();
    services
        .certificate
        .attach_document(&certificate.id, "doc://certificates/rendered.pdf")
        .unwrap();

    let reloaded = services.certificate.get(&certificate.id).unwrap().unwrap();
    assert_eq!(
        reloaded.document_ref.as_deref(),
        Some("doc://certificates/rendered.pdf")
    );
}
