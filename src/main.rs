//! Proctor daemon
//!
//! Runs the assessment engine HTTP API and the outbound delivery
//! worker.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! proctor
//!
//! # Start with custom config
//! proctor --config /path/to/config.toml
//!
//! # Start with custom HTTP port
//! proctor --http-port 8094
//!
//! # Start with custom storage directory
//! proctor --storage-dir /data/proctor
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proctor::collaborators::{
    EligibilityChecker, EligibilityOutcome, Identity, StaticIdentityResolver, StaticModuleCatalog,
};
use proctor::db::attempts;
use proctor::{
    Config, EngineDb, EngineError, HttpServer, OutboundConfig, OutboundQueue, OutboundWorker,
    RateLimiter, Services,
};

#[derive(Parser, Debug)]
#[command(name = "proctor")]
#[command(about = "Assessment and certification engine")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "PROCTOR_HTTP_PORT")]
    http_port: Option<u16>,

    /// Attempt time limit in seconds
    #[arg(long, env = "PROCTOR_TIME_LIMIT_SECS")]
    time_limit_secs: Option<u64>,
}

/// Default eligibility rule for single-node deployments: a learner is
/// eligible once a passed attempt for the course is on file. Real
/// deployments swap in the enrollment service's checker.
struct PassedAttemptEligibility {
    db: Arc<EngineDb>,
}

impl EligibilityChecker for PassedAttemptEligibility {
    fn check(&self, learner: &str, course: &str) -> Result<EligibilityOutcome, EngineError> {
        let passed = self
            .db
            .with_conn(|conn| attempts::latest_passed_attempt(conn, learner, course))?;

        match passed {
            Some(_) => Ok(EligibilityOutcome {
                eligible: true,
                reasons: vec![],
            }),
            None => Ok(EligibilityOutcome {
                eligible: false,
                reasons: vec![format!("no passed attempt for course '{}'", course)],
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("proctor=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(secs) = args.time_limit_secs {
        config.time_limit_secs = secs;
    }

    std::fs::create_dir_all(&config.storage_dir)?;
    info!(storage_dir = ?config.storage_dir, "Starting proctor");

    let db = Arc::new(EngineDb::open(&config.storage_dir)?);

    // Collaborators: static catalog/identity from config, attempt-based
    // eligibility. Deployments integrate real services here.
    let catalog = Arc::new(StaticModuleCatalog::new(config.course_modules.clone()));
    let identity = Arc::new(StaticIdentityResolver::new(config.auth_tokens.iter().map(
        |entry| {
            (
                entry.token.clone(),
                Identity {
                    subject: entry.subject.clone(),
                    display_name: entry.display_name.clone(),
                    staff: entry.staff,
                },
            )
        },
    )));
    let eligibility = Arc::new(PassedAttemptEligibility { db: db.clone() });

    let (outbound, outbound_rx) = OutboundQueue::new();
    let services = Arc::new(Services::new(
        db,
        catalog,
        eligibility,
        outbound,
        Duration::from_secs(config.time_limit_secs),
        config.code_length,
    ));

    // Audit listener for engine events
    proctor::services::events::spawn_logging_listener(services.events.clone());

    // Outbound worker; renderer and notifier are absent until external
    // collaborators are wired in
    let worker = OutboundWorker::new(
        outbound_rx,
        services.certificate.clone(),
        None,
        None,
        OutboundConfig {
            max_retries: config.outbound_max_retries,
            base_delay: Duration::from_millis(config.outbound_base_delay_ms),
        },
    );
    tokio::spawn(worker.run());

    // HTTP server
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_max_requests,
        Duration::from_secs(config.rate_limit_window_secs),
    ));
    let bind_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let server = Arc::new(HttpServer::new(services, identity, limiter, bind_addr));

    server.run().await?;

    Ok(())
}
