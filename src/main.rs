//! WeGrow Backend - parenting community REST API
//!
//! Runs against Firebase (Realtime Database, Identity Toolkit, FCM) and an
//! HTTPS mail relay. Without `FIREBASE_DATABASE_URL` every collaborator is
//! replaced by its in-memory implementation for local development.

use std::sync::Arc;
use tracing::{info, warn};
use wegrow_backend::{
    build_router,
    firebase::{IdentityToolkit, RealtimeDatabase},
    identity::{IdentityProvider, MemoryIdentity},
    mail::{HttpMailer, Mailer, Outbox},
    notify::{FcmClient, MemoryNotifier, Notifier},
    store::Database,
    AppState, Config, MemoryStore,
};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Initialize structured logging
    init_tracing();

    // Load configuration
    let config = Config::from_env();
    log_startup_info(&config);

    let state = match build_state(config.clone()) {
        Ok(state) => state,
        Err(reason) => {
            tracing::error!(reason, "Invalid configuration");
            std::process::exit(1);
        }
    };

    // Build and serve the application
    let app = build_router(state);
    serve(app, &config).await;
}

/// Initialize tracing with environment-based log levels.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wegrow_backend=debug,tower_http=info")),
        )
        .init();
}

/// Log startup configuration (no secrets).
fn log_startup_info(config: &Config) {
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        storage = if config.firebase_configured() { "firebase" } else { "memory" },
        mail_enabled = config.mail_configured(),
        admin_emails = config.admin_emails.len(),
        new_video_topic = %config.new_video_topic,
        remote_timeout_secs = config.remote_timeout.as_secs(),
        "Starting WeGrow backend"
    );
}

/// Wire the collaborators selected by configuration
fn build_state(config: Config) -> Result<AppState, &'static str> {
    let Some(database_url) = config.database_url.clone() else {
        warn!("FIREBASE_DATABASE_URL not set - using in-memory backends (development mode)");
        let identity = MemoryIdentity::new(config.action_url.clone());
        return Ok(AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(identity),
            Arc::new(Outbox::new()),
            Arc::new(MemoryNotifier::new()),
        ));
    };

    let api_key = config
        .firebase_api_key
        .clone()
        .ok_or("FIREBASE_API_KEY is required with FIREBASE_DATABASE_URL")?;

    let db: Arc<dyn Database> = Arc::new(
        RealtimeDatabase::new(&database_url, &config)
            .map_err(|_| "FIREBASE_DATABASE_URL is not an absolute URL")?,
    );
    let identity: Arc<dyn IdentityProvider> = Arc::new(IdentityToolkit::new(api_key, &config));
    let notifier: Arc<dyn Notifier> = Arc::new(FcmClient::new(&config));
    let mailer: Arc<dyn Mailer> = match &config.mail_api_url {
        Some(url) => Arc::new(HttpMailer::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
            config.remote_timeout,
        )),
        None => {
            warn!("MAIL_API_URL not set - emails are kept in memory and never delivered");
            Arc::new(Outbox::new())
        }
    };

    Ok(AppState::new(config, db, identity, mailer, notifier))
}

/// Bind to address and serve the application.
async fn serve(app: axum::Router, config: &Config) {
    let bind_addr = format!("{}:{}", config.bind_addr, config.port);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, "Server listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
    }
}
