//! Proctor - assessment and certification engine
//!
//! Turns a pool of versioned quiz content into graded, time-bounded
//! exam attempts, and passing attempts into publicly verifiable
//! certificates.
//!
//! ## Architecture
//!
//! - **Content store** (`db/items`) - versioned items with an
//!   append-only revision log and hash-deduplicated imports
//! - **Blueprint resolver** (`db/blueprints`) - active sampling policy
//!   per (course, locale), with a built-in default
//! - **Pool builder + assembler** (`exam`) - candidate pool with orphan
//!   tag handling, stratified paper assembly, deterministic grading
//! - **Attempt state machine** (`services/exam_service`) -
//!   `in_progress` -> `passed` | `failed`, frozen papers, server-side
//!   deadlines, single-shot finalization
//! - **Certificate issuer** (`services/certificate_service`) -
//!   eligibility gate, unambiguous verification codes, public
//!   verification projection
//! - **Outbound dispatch** (`outbound`) - downstream effects of a pass
//!   as retried tasks, never inline calls
//!
//! External concerns (enrollment rules, lesson catalog, identity,
//! rendering, notifications) are consumed through the traits in
//! `collaborators`.

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod exam;
pub mod http;
pub mod outbound;
pub mod rate_limit;
pub mod services;
pub mod views;

// Re-exports
pub use config::Config;
pub use db::EngineDb;
pub use error::EngineError;
pub use http::HttpServer;
pub use outbound::{OutboundConfig, OutboundQueue, OutboundTask, OutboundWorker};
pub use rate_limit::RateLimiter;
pub use services::Services;
