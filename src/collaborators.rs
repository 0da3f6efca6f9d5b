//! Collaborator seams for systems outside the engine
//!
//! The engine consumes enrollment rules, the lesson/module catalog,
//! identity lookup, document rendering, and notification delivery as
//! interfaces only. Nothing here receives a full assessment item with
//! its correct answer; collaborators see stable identifiers and
//! public-safe projections.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::EngineError;

/// Resolved caller identity
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable learner identifier
    pub subject: String,
    /// Display name, used only to derive a public first-name label
    pub display_name: Option<String>,
    /// Staff capability (authoring, blueprints, revocation)
    pub staff: bool,
}

impl Identity {
    /// First-name-only label safe for public projections
    pub fn public_label(&self) -> Option<String> {
        self.display_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .map(|first| first.to_string())
    }
}

/// Token -> identity lookup, backed by the platform's session management
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<Identity>;
}

/// Lesson/module catalog: which module tags a course links, and the
/// full module tag universe (for orphan detection)
pub trait ModuleCatalog: Send + Sync {
    fn linked_module_tags(&self, course: &str) -> Result<HashSet<String>, EngineError>;
    fn all_module_tags(&self) -> Result<HashSet<String>, EngineError>;
}

/// Outcome of an external eligibility check
#[derive(Debug, Clone)]
pub struct EligibilityOutcome {
    pub eligible: bool,
    pub reasons: Vec<String>,
}

/// Enrollment/eligibility rules live outside the engine; the issuer
/// only consumes the verdict
pub trait EligibilityChecker: Send + Sync {
    fn check(&self, learner: &str, course: &str) -> Result<EligibilityOutcome, EngineError>;
}

/// External certificate document renderer. Returns an opaque document
/// reference once rendering completes.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, certificate_id: &str, course: &str) -> Result<String, EngineError>;
}

/// External notification delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, learner: &str, subject: &str, body: &str) -> Result<(), EngineError>;
}

// ============================================================================
// Built-in static implementations (single-node deployments, tests)
// ============================================================================

/// Identity resolver over a provisioned token table
pub struct StaticIdentityResolver {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityResolver {
    pub fn new(entries: impl IntoIterator<Item = (String, Identity)>) -> Self {
        Self {
            tokens: entries.into_iter().collect(),
        }
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn resolve(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

/// Module catalog backed by a static course -> tags map
pub struct StaticModuleCatalog {
    linked: HashMap<String, HashSet<String>>,
}

impl StaticModuleCatalog {
    pub fn new(courses: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            linked: courses
                .into_iter()
                .map(|(course, tags)| (course, tags.into_iter().collect()))
                .collect(),
        }
    }
}

impl ModuleCatalog for StaticModuleCatalog {
    fn linked_module_tags(&self, course: &str) -> Result<HashSet<String>, EngineError> {
        Ok(self.linked.get(course).cloned().unwrap_or_default())
    }

    fn all_module_tags(&self) -> Result<HashSet<String>, EngineError> {
        Ok(self.linked.values().flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_label_is_first_name_only() {
        let identity = Identity {
            subject: "learner-1".to_string(),
            display_name: Some("Ada Lovelace".to_string()),
            staff: false,
        };
        assert_eq!(identity.public_label().as_deref(), Some("Ada"));

        let anonymous = Identity {
            subject: "learner-2".to_string(),
            display_name: None,
            staff: false,
        };
        assert_eq!(anonymous.public_label(), None);
    }

    #[test]
    fn test_static_catalog_orphan_universe() {
        let catalog = StaticModuleCatalog::new([
            ("course-a".to_string(), vec!["safety".to_string(), "ops".to_string()]),
            ("course-b".to_string(), vec!["ops".to_string()]),
        ]);

        let linked = catalog.linked_module_tags("course-a").unwrap();
        assert!(linked.contains("safety"));
        assert!(!linked.contains("legacy"));

        let all = catalog.all_module_tags().unwrap();
        assert_eq!(all.len(), 2);
    }
}
