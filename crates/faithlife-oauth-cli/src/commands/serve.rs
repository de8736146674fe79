//! Serve command - hosts the sign-in routes with in-memory sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{Json, Router, middleware, response::IntoResponse, routing::get};
use clap::Args;
use faithlife_oauth::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};
use faithlife_oauth::{
    AuthorizationFlow, CurrentAuthorization, FlowSessionState, MemorySessionStore, SessionHandle,
    oauth_router, session_middleware,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:3000", env = "FAITHLIFE_OAUTH_BIND")]
    pub bind: SocketAddr,

    /// Path the OAuth routes are mounted under
    #[arg(long, default_value = "/oauth")]
    pub base_path: String,

    /// Maximum number of in-memory sessions
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    ctx.identity
        .validate()
        .context("refusing to start without a usable consumer identity")?;

    let base_path = normalize_base_path(&args.base_path)?;
    let flow = Arc::new(AuthorizationFlow::new(ctx.identity.clone()));
    let store = MemorySessionStore::with_limits(args.max_sessions, DEFAULT_IDLE_TIMEOUT);
    let app = build_app(flow, store, &base_path);

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        signin = %format!("http://{}{}/signin", local_addr, base_path),
        provider = ctx.identity.provider_root_url(),
        "Starting OAuth host"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Assemble the host application.
fn build_app(flow: Arc<AuthorizationFlow>, store: MemorySessionStore, base_path: &str) -> Router {
    let home = Router::new()
        .route("/", get(handle_home))
        .with_state(flow.clone());

    // Routes added after the session layer never touch the store.
    Router::new()
        .nest(base_path, oauth_router(flow))
        .merge(home)
        .layer(middleware::from_fn_with_state(store, session_middleware))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
}

/// Handle GET /
async fn handle_home(
    session: SessionHandle,
    CurrentAuthorization(authorization): CurrentAuthorization,
) -> faithlife_oauth::Result<impl IntoResponse> {
    let state = FlowSessionState::load(session.session()).await?;
    let authorization = state
        .is_authenticated()
        .then(|| authorization.into_string());

    Ok(Json(serde_json::json!({
        "authenticated": state.is_authenticated(),
        "authorization": authorization,
    })))
}

/// Handle GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "faithlife-oauth"
    }))
}

fn normalize_base_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        anyhow::bail!("--base-path must not be the root; the host serves its own / route");
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
