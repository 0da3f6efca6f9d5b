//! Service layer for the assessment engine
//!
//! Services encapsulate business logic between HTTP handlers and
//! repositories. Each service wraps database operations with:
//! - Input validation
//! - Cross-entity orchestration
//! - Event emission for audit/notifications
//! - Outbound task dispatch for downstream effects
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (business logic)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod content_service;
pub mod exam_service;
pub mod certificate_service;

// Re-exports
pub use response::*;
pub use events::{EngineEvent, EventBus, EventListener};
pub use content_service::ContentService;
pub use exam_service::ExamService;
pub use certificate_service::CertificateService;

use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{EligibilityChecker, ModuleCatalog};
use crate::db::EngineDb;
use crate::outbound::OutboundQueue;

/// Service container for dependency injection
///
/// Holds all services with shared database and event bus. Pass this to
/// HttpServer for handler access.
pub struct Services {
    pub content: Arc<ContentService>,
    pub exam: Arc<ExamService>,
    pub certificate: Arc<CertificateService>,
    pub events: Arc<EventBus>,
    pub db: Arc<EngineDb>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(
        db: Arc<EngineDb>,
        catalog: Arc<dyn ModuleCatalog>,
        eligibility: Arc<dyn EligibilityChecker>,
        outbound: OutboundQueue,
        time_limit: Duration,
        code_length: usize,
    ) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            content: Arc::new(ContentService::new(db.clone(), events.clone())),
            exam: Arc::new(ExamService::new(
                db.clone(),
                events.clone(),
                catalog,
                outbound.clone(),
                time_limit,
            )),
            certificate: Arc::new(CertificateService::new(
                db.clone(),
                events.clone(),
                eligibility,
                outbound,
                code_length,
            )),
            events,
            db,
        }
    }
}
