//! Event system for engine operations
//!
//! Provides an event bus for notifying listeners about engine
//! operations. Useful for:
//! - Audit logging
//! - Cache invalidation
//! - Operational follow-up on outbound failures

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Engine events emitted by services
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // Content events
    ItemCreated {
        id: String,
        version: i64,
    },
    ItemUpdated {
        id: String,
        version: i64,
    },
    ItemReverted {
        id: String,
        version: i64,
    },
    ItemsImported {
        inserted: usize,
        skipped: usize,
        errors: usize,
        dry_run: bool,
    },

    // Blueprint events
    BlueprintReplaced {
        course: String,
        locale: String,
    },

    // Attempt events
    AttemptCreated {
        id: String,
        learner: String,
        course: String,
    },
    AttemptFinalized {
        id: String,
        status: String,
        score: f64,
    },

    // Certificate events
    CertificateIssued {
        id: String,
        learner: String,
        course: String,
    },
    CertificateRevoked {
        id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &EngineEvent);
}

/// Event bus for broadcasting engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::ItemCreated { id, version } => {
                debug!(id = %id, version = version, "Item created");
            }
            EngineEvent::ItemsImported { inserted, skipped, errors, dry_run } => {
                debug!(inserted, skipped, errors, dry_run, "Import batch processed");
            }
            EngineEvent::AttemptFinalized { id, status, score } => {
                debug!(id = %id, status = %status, score = score, "Attempt finalized");
            }
            EngineEvent::CertificateIssued { id, learner, course } => {
                debug!(id = %id, learner = %learner, course = %course, "Certificate issued");
            }
            _ => {
                trace!(event = ?event, "Engine event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
