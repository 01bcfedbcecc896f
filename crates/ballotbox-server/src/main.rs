use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ballotbox_api::auth::{self, AppState, AppStateInner};
use ballotbox_api::middleware::require_auth;
use ballotbox_api::polls;
use ballotbox_core::PollEngine;
use ballotbox_db::Database;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ballotbox=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("BALLOTBOX_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: BALLOTBOX_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }
    let db_path = std::env::var("BALLOTBOX_DB_PATH").unwrap_or_else(|_| "ballotbox.db".into());
    let host = std::env::var("BALLOTBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BALLOTBOX_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let engine = PollEngine::new(db.clone());

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/poll/{id}/results", get(polls::get_results))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/profile", get(auth::profile))
        .route("/auth/profile", put(auth::update_profile))
        .route("/auth/profile", delete(auth::delete_profile))
        .route("/auth/voted-polls", get(auth::voted_polls))
        .route("/auth/users", get(auth::list_users))
        .route("/poll", get(polls::list_polls))
        .route("/poll", post(polls::create_poll))
        .route("/poll/{id}", get(polls::get_poll))
        .route("/poll/{id}", put(polls::update_poll))
        .route("/poll/{id}", delete(polls::delete_poll))
        .route("/poll/{id}/vote", put(polls::vote))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ballotbox server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
