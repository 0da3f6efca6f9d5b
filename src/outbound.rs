//! Outbound task dispatch
//!
//! Downstream effects of a passing grade (certificate issuance, result
//! notification, document rendering) are explicit queued tasks, not
//! inline calls. The worker retries transient failures with exponential
//! backoff; permanent failures and exhausted retries are logged and
//! dropped. Nothing here ever propagates back into the operation that
//! queued the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::collaborators::{DocumentRenderer, Notifier};
use crate::error::EngineError;
use crate::services::certificate_service::CertificateService;

/// One queued downstream effect
#[derive(Debug, Clone)]
pub enum OutboundTask {
    /// Auto-issue a certificate after a passing attempt
    IssueCertificate {
        learner: String,
        learner_label: Option<String>,
        course: String,
        attempt_id: String,
    },
    /// Ask the external renderer for a certificate document
    RenderDocument {
        certificate_id: String,
        course: String,
    },
    /// Deliver a notification through the external channel
    Notify {
        learner: String,
        subject: String,
        body: String,
    },
}

impl OutboundTask {
    fn kind(&self) -> &'static str {
        match self {
            OutboundTask::IssueCertificate { .. } => "issue_certificate",
            OutboundTask::RenderDocument { .. } => "render_document",
            OutboundTask::Notify { .. } => "notify",
        }
    }
}

/// Cloneable enqueue handle held by services
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundTask>,
}

impl OutboundQueue {
    /// Create a queue and the receiving end for a worker
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a task. A closed channel (worker gone) is logged, never
    /// surfaced to the caller.
    pub fn enqueue(&self, task: OutboundTask) {
        let kind = task.kind();
        if self.tx.send(task).is_err() {
            warn!(kind, "Outbound worker is gone, task dropped");
        }
    }
}

/// Retry policy for outbound deliveries
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Worker draining the outbound queue
pub struct OutboundWorker {
    rx: mpsc::UnboundedReceiver<OutboundTask>,
    certificates: Arc<CertificateService>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: OutboundConfig,
}

impl OutboundWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<OutboundTask>,
        certificates: Arc<CertificateService>,
        renderer: Option<Arc<dyn DocumentRenderer>>,
        notifier: Option<Arc<dyn Notifier>>,
        config: OutboundConfig,
    ) -> Self {
        Self {
            rx,
            certificates,
            renderer,
            notifier,
            config,
        }
    }

    /// Drain the queue until every sender is dropped
    pub async fn run(mut self) {
        info!("Outbound worker started");
        while let Some(task) = self.rx.recv().await {
            self.deliver_with_retry(task).await;
        }
        info!("Outbound worker stopped");
    }

    async fn deliver_with_retry(&self, task: OutboundTask) {
        let kind = task.kind();
        let mut delay = self.config.base_delay;

        for attempt in 1..=self.config.max_retries {
            match self.deliver(&task).await {
                Ok(()) => {
                    debug!(kind, attempt, "Outbound task delivered");
                    return;
                }
                Err(e) if !e.is_transient() => {
                    warn!(kind, error = %e, "Outbound task failed permanently, dropping");
                    return;
                }
                Err(e) => {
                    warn!(kind, attempt, error = %e, "Outbound task failed, will retry");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        error!(kind, retries = self.config.max_retries, "Outbound task exhausted retries, dropping");
    }

    async fn deliver(&self, task: &OutboundTask) -> Result<(), EngineError> {
        match task {
            OutboundTask::IssueCertificate {
                learner,
                learner_label,
                course,
                attempt_id,
            } => {
                // issue() is idempotent and queues document rendering itself
                self.certificates
                    .issue(learner, learner_label.as_deref(), course, Some(attempt_id))
                    .map(|_| ())
            }
            OutboundTask::RenderDocument { certificate_id, course } => {
                let Some(renderer) = &self.renderer else {
                    debug!(certificate_id = %certificate_id, "No renderer configured, skipping");
                    return Ok(());
                };
                let document_ref = renderer.render(certificate_id, course).await?;
                self.certificates.attach_document(certificate_id, &document_ref)?;
                Ok(())
            }
            OutboundTask::Notify { learner, subject, body } => {
                let Some(notifier) = &self.notifier else {
                    debug!(learner = %learner, "No notifier configured, skipping");
                    return Ok(());
                };
                notifier.notify(learner, subject, body).await
            }
        }
    }
}
