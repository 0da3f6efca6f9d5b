//! HTTP API for the assessment engine
//!
//! Thin hyper handlers over the service layer:
//!
//! ## Authoring (staff)
//! - `POST /items/import` - Batch import with per-row classification
//! - `GET /items` / `POST /items` - List / create items
//! - `GET|PUT /items/{id}` - Read / CAS-save one item
//! - `POST /items/{id}/revert` - Revert to a revision's before snapshot
//! - `GET /items/{id}/revisions` - Revision history
//! - `PUT /blueprints` / `GET /blueprints` - Sampling policies
//!
//! ## Exam (learner)
//! - `POST /attempts` - Create a timed attempt
//! - `POST /attempts/{id}/submit` - Grade and finalize
//! - `GET /attempts/{id}` - Review (owner or staff)
//!
//! ## Credentials
//! - `POST /certificates/issue` - Issue (self, or any learner for staff)
//! - `POST /certificates/{id}/document` - Attach rendered document ref
//! - `POST /certificates/{id}/revoke` - Revoke
//! - `GET /verify/{code}` - Public verification, no auth

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::collaborators::{Identity, IdentityResolver};
use crate::db::items::{ImportRow, ItemQuery, SaveItemInput};
use crate::db::blueprints::{self, UpsertBlueprintInput};
use crate::error::EngineError;
use crate::rate_limit::RateLimiter;
use crate::services::{response, Services};
use crate::views::{
    AttemptCreatedView, AttemptView, BlueprintView, CertificateIssuedView, ImportRowView,
    ItemView, RevisionView, SubmitResultView,
};

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    identity: Arc<dyn IdentityResolver>,
    limiter: Arc<RateLimiter>,
    bind_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    rows: Vec<ImportRow>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevertRequest {
    revision_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAttemptRequest {
    course: String,
    #[serde(default = "default_locale")]
    locale: String,
}

fn default_locale() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    answers: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueRequest {
    #[serde(default)]
    learner: Option<String>,
    course: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRequest {
    document_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlueprintQuery {
    #[serde(default)]
    course: Option<String>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        services: Arc<Services>,
        identity: Arc<dyn IdentityResolver>,
        limiter: Arc<RateLimiter>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            services,
            identity,
            limiter,
            bind_addr,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let result = match (method, path.as_str()) {
            // Health check
            (Method::GET, "/health") => self.handle_health().await,

            // Authoring
            (Method::POST, "/items/import") => self.handle_import(req).await,
            (Method::GET, "/items") => self.handle_list_items(req).await,
            (Method::POST, "/items") => self.handle_save_item(req, None).await,
            (Method::GET, p) if p.starts_with("/items/") && p.ends_with("/revisions") => {
                let id = strip(p, "/items/", "/revisions");
                self.handle_revisions(req, &id).await
            }
            (Method::POST, p) if p.starts_with("/items/") && p.ends_with("/revert") => {
                let id = strip(p, "/items/", "/revert");
                self.handle_revert(req, &id).await
            }
            (Method::GET, p) if p.starts_with("/items/") => {
                let id = p.strip_prefix("/items/").unwrap_or("").to_string();
                self.handle_get_item(req, &id).await
            }
            (Method::PUT, p) if p.starts_with("/items/") => {
                let id = p.strip_prefix("/items/").unwrap_or("").to_string();
                self.handle_save_item(req, Some(id)).await
            }

            // Blueprints
            (Method::PUT, "/blueprints") => self.handle_upsert_blueprint(req).await,
            (Method::GET, "/blueprints") => self.handle_list_blueprints(req).await,

            // Attempts
            (Method::POST, "/attempts") => self.handle_create_attempt(req).await,
            (Method::POST, p) if p.starts_with("/attempts/") && p.ends_with("/submit") => {
                let id = strip(p, "/attempts/", "/submit");
                self.handle_submit(req, &id).await
            }
            (Method::GET, p) if p.starts_with("/attempts/") => {
                let id = p.strip_prefix("/attempts/").unwrap_or("").to_string();
                self.handle_get_attempt(req, &id).await
            }

            // Certificates
            (Method::POST, "/certificates/issue") => self.handle_issue(req).await,
            (Method::POST, p) if p.starts_with("/certificates/") && p.ends_with("/document") => {
                let id = strip(p, "/certificates/", "/document");
                self.handle_attach_document(req, &id).await
            }
            (Method::POST, p) if p.starts_with("/certificates/") && p.ends_with("/revoke") => {
                let id = strip(p, "/certificates/", "/revoke");
                self.handle_revoke(req, &id).await
            }

            // Public verification
            (Method::GET, p) if p.starts_with("/verify/") => {
                let code = p.strip_prefix("/verify/").unwrap_or("").to_string();
                self.handle_verify(&code, remote_addr).await
            }

            _ => Ok(response::not_found("unknown route")),
        };

        Ok(result.unwrap_or_else(|e| response::error_response(&e)))
    }

    // =========================================================================
    // Identity helpers
    // =========================================================================

    fn authenticate(&self, req: &Request<Incoming>) -> Option<Identity> {
        let header = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = header.strip_prefix("Bearer ")?;
        self.identity.resolve(token)
    }

    fn require_identity(&self, req: &Request<Incoming>) -> Result<Identity, EngineError> {
        self.authenticate(req).ok_or(EngineError::AuthenticationRequired)
    }

    fn require_staff(&self, req: &Request<Incoming>) -> Result<Identity, EngineError> {
        let identity = self.require_identity(req)?;
        if !identity.staff {
            return Err(EngineError::AuthorizationDenied(
                "staff capability required".to_string(),
            ));
        }
        Ok(identity)
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn handle_health(&self) -> Result<Response<Full<Bytes>>, EngineError> {
        let stats = self.services.db.stats()?;
        Ok(response::ok(&serde_json::json!({
            "status": "ok",
            "stats": stats,
        })))
    }

    async fn handle_import(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, EngineError> {
        let editor = self.require_staff(&req)?;
        let body: ImportRequest = read_json(req).await?;

        let results = self
            .services
            .content
            .import(body.rows, body.dry_run, &editor.subject)?;
        let views: Vec<ImportRowView> = results.into_iter().map(Into::into).collect();

        Ok(response::ok(&serde_json::json!({
            "dryRun": body.dry_run,
            "rows": views,
        })))
    }

    async fn handle_list_items(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;
        let query: ItemQuery = parse_query(&req)?;

        let items = self.services.content.list(&query)?;
        let views: Vec<ItemView> = items.into_iter().map(Into::into).collect();
        Ok(response::ok(&views))
    }

    async fn handle_get_item(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;

        match self.services.content.get(id)? {
            Some(item) => Ok(response::ok(&ItemView::from(item))),
            None => Ok(response::not_found("item not found")),
        }
    }

    async fn handle_save_item(
        &self,
        req: Request<Incoming>,
        path_id: Option<String>,
    ) -> Result<Response<Full<Bytes>>, EngineError> {
        let editor = self.require_staff(&req)?;
        let mut input: SaveItemInput = read_json(req).await?;
        let creating = path_id.is_none() && input.id.is_none();
        if path_id.is_some() {
            input.id = path_id;
        }

        let item = self.services.content.save(input, &editor.subject)?;
        let view = ItemView::from(item);
        if creating {
            Ok(response::created(&view))
        } else {
            Ok(response::ok(&view))
        }
    }

    async fn handle_revert(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        let editor = self.require_staff(&req)?;
        let body: RevertRequest = read_json(req).await?;

        let item = self
            .services
            .content
            .revert(id, &body.revision_id, &editor.subject)?;
        Ok(response::ok(&ItemView::from(item)))
    }

    async fn handle_revisions(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;

        let revisions = self.services.content.revisions(id)?;
        let views: Vec<RevisionView> = revisions.into_iter().map(Into::into).collect();
        Ok(response::ok(&views))
    }

    async fn handle_upsert_blueprint(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;
        let input: UpsertBlueprintInput = read_json(req).await?;

        if input.question_count == 0 {
            return Err(EngineError::Validation(
                "question_count must be positive".to_string(),
            ));
        }

        let course = input.course.clone();
        let locale = input.locale.clone();
        let blueprint = self
            .services
            .db
            .with_conn_mut(|conn| blueprints::upsert_blueprint(conn, input))?;
        self.services.events.emit(crate::services::EngineEvent::BlueprintReplaced {
            course,
            locale,
        });

        Ok(response::ok(&BlueprintView::from(blueprint)))
    }

    async fn handle_list_blueprints(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;
        let query: BlueprintQuery = parse_query(&req)?;

        let rows = self
            .services
            .db
            .with_conn(|conn| blueprints::list_blueprints(conn, query.course.as_deref()))?;
        let views: Vec<BlueprintView> = rows.into_iter().map(Into::into).collect();
        Ok(response::ok(&views))
    }

    async fn handle_create_attempt(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, EngineError> {
        let identity = self.require_identity(&req)?;

        if !self.limiter.check(&format!("attempt:{}", identity.subject)) {
            return Ok(response::too_many_requests());
        }

        let body: CreateAttemptRequest = read_json(req).await?;
        let attempt = self
            .services
            .exam
            .create_attempt(&identity, &body.course, &body.locale)?;

        Ok(response::created(&AttemptCreatedView::from(&attempt)))
    }

    async fn handle_submit(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        let identity = self.require_identity(&req)?;
        let body: SubmitRequest = read_json(req).await?;

        let outcome = self.services.exam.submit(&identity, id, &body.answers)?;
        Ok(response::ok(&SubmitResultView::new(&outcome.grade, &outcome.attempt)))
    }

    async fn handle_get_attempt(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        let identity = self.require_identity(&req)?;

        let attempt = self.services.exam.get_attempt(&identity, id)?;
        Ok(response::ok(&AttemptView::from(attempt)))
    }

    async fn handle_issue(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, EngineError> {
        let identity = self.require_identity(&req)?;
        let body: IssueRequest = read_json(req).await?;

        let learner = body.learner.unwrap_or_else(|| identity.subject.clone());
        if learner != identity.subject && !identity.staff {
            return Err(EngineError::AuthorizationDenied(
                "issuing for another learner requires staff capability".to_string(),
            ));
        }

        let label = if learner == identity.subject {
            identity.public_label()
        } else {
            None
        };

        let certificate =
            self.services
                .certificate
                .issue(&learner, label.as_deref(), &body.course, None)?;

        Ok(response::created(&CertificateIssuedView {
            certificate_id: certificate.id,
            verification_code: certificate.verification_code,
        }))
    }

    async fn handle_attach_document(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;
        let body: DocumentRequest = read_json(req).await?;

        self.services.certificate.attach_document(id, &body.document_ref)?;
        Ok(response::ok(&serde_json::json!({ "ok": true })))
    }

    async fn handle_revoke(&self, req: Request<Incoming>, id: &str) -> Result<Response<Full<Bytes>>, EngineError> {
        self.require_staff(&req)?;

        self.services.certificate.revoke(id)?;
        Ok(response::ok(&serde_json::json!({ "ok": true })))
    }

    async fn handle_verify(&self, code: &str, remote_addr: SocketAddr) -> Result<Response<Full<Bytes>>, EngineError> {
        // Public endpoint; throttle per caller address
        if !self.limiter.check(&format!("verify:{}", remote_addr.ip())) {
            return Ok(response::too_many_requests());
        }

        match self.services.certificate.verify(code)? {
            Some(view) => Ok(response::ok(&view)),
            None => Ok(response::not_found("certificate not found")),
        }
    }
}

fn strip(path: &str, prefix: &str, suffix: &str) -> String {
    path.strip_prefix(prefix)
        .and_then(|p| p.strip_suffix(suffix))
        .unwrap_or("")
        .trim_end_matches('/')
        .to_string()
}

fn parse_query<T: DeserializeOwned>(req: &Request<Incoming>) -> Result<T, EngineError> {
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| EngineError::Validation(format!("bad query string: {}", e)))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, EngineError> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| EngineError::Internal(format!("Body read failed: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}
