//! Connector service: HTTP hosting, idle-session reaping, shutdown.
//!
//! Owns one [`ProtocolEngine`] and exposes it on a single SOAP endpoint.
//! Runs until its stop handle is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use qbwc_core::{
    Authenticator, Dispatcher, HandlerRegistry, ProtocolEngine, RequestCatalog, SessionStore,
};

use crate::config::ServerConfig;
use crate::soap::{self, SoapError};

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

// ── Router ───────────────────────────────────────────────────────

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct ConnectorState {
    pub engine: Arc<ProtocolEngine>,
}

/// Build the HTTP router: the SOAP endpoint at `endpoint_path` plus
/// `/health`. Request bodies larger than `max_body_bytes` get a SOAP fault.
pub fn router(engine: Arc<ProtocolEngine>, endpoint_path: &str, max_body_bytes: usize) -> Router {
    let path = if endpoint_path.starts_with('/') {
        endpoint_path.to_string()
    } else {
        format!("/{endpoint_path}")
    };

    Router::new()
        .route(&path, post(soap_endpoint).get(endpoint_info))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(ConnectorState { engine })
}

async fn soap_endpoint(
    State(state): State<ConnectorState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let error = SoapError::BodyRejected(rejection.body_text());
            warn!(status = %rejection.status(), "rejecting request: {error}");
            return xml_response(StatusCode::INTERNAL_SERVER_ERROR, soap::render_fault(&error));
        }
    };
    let text = String::from_utf8_lossy(&body);
    match soap::parse_envelope(&text) {
        Ok(call) => {
            let operation = call.operation();
            debug!(operation, "soap call");
            let reply = call.execute(&state.engine);
            xml_response(StatusCode::OK, soap::render_response(operation, &reply))
        }
        Err(e) => {
            warn!("rejecting envelope: {e}");
            xml_response(StatusCode::INTERNAL_SERVER_ERROR, soap::render_fault(&e))
        }
    }
}

async fn endpoint_info(State(state): State<ConnectorState>) -> impl IntoResponse {
    state.engine.server_version()
}

async fn health(State(state): State<ConnectorState>) -> impl IntoResponse {
    let stats = state.engine.dispatch_stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": state.engine.server_version(),
        "sessions": state.engine.sessions().len(),
        "catalog_size": state.engine.catalog().size(),
        "dispatch": stats,
        "in_flight": stats.in_flight(),
    }))
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, XML_CONTENT_TYPE)], body).into_response()
}

// ── Idle reaper ──────────────────────────────────────────────────

/// Drop sessions idle for longer than `max_idle`, checking every
/// `every`, until `shutdown` is cancelled.
pub async fn reap_idle_sessions(
    store: Arc<SessionStore>,
    max_idle: Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        for session in store.drain_idle(max_idle) {
            info!(
                ticket = %session.ticket,
                username = %session.username,
                idle_secs = session.idle_for().as_secs(),
                "reaped idle session"
            );
        }
    }
}

// ── ConnectorService ─────────────────────────────────────────────

/// The top-level connector service.
pub struct ConnectorService {
    config: ServerConfig,
    engine: Arc<ProtocolEngine>,
    shutdown: CancellationToken,
}

impl ConnectorService {
    /// Wrap an already-built engine.
    pub fn new(config: ServerConfig, engine: Arc<ProtocolEngine>) -> Self {
        Self {
            config,
            engine,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the catalog, handlers, dispatcher and engine from `config`.
    ///
    /// Must be called inside a Tokio runtime (the dispatcher spawns its
    /// supervisor).
    pub fn from_config(config: ServerConfig) -> Self {
        let catalog = RequestCatalog::load(&config.catalog.directory, &config.catalog.requests);
        let registry = HandlerRegistry::with_defaults(config.handlers.parse_limit);
        let dispatcher = Dispatcher::start(registry, config.to_dispatch_config());
        let authenticator =
            Authenticator::new(config.secret(), config.auth.company_file_path.clone());
        let engine = Arc::new(ProtocolEngine::new(catalog, authenticator, dispatcher));
        Self::new(config, engine)
    }

    /// A handle that stops the service when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn engine(&self) -> Arc<ProtocolEngine> {
        Arc::clone(&self.engine)
    }

    /// Serve until stopped.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = self.config.network.listen_addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            "connector listening on {addr}{}",
            self.config.network.endpoint_path
        );

        let reaper = self.config.idle_timeout().map(|max_idle| {
            tokio::spawn(reap_idle_sessions(
                self.engine.sessions(),
                max_idle,
                self.config.reap_interval(),
                self.shutdown.clone(),
            ))
        });

        let app = router(
            Arc::clone(&self.engine),
            &self.config.network.endpoint_path,
            self.config.network.max_body_bytes,
        );
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        self.shutdown.cancel();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        self.engine
            .shutdown_dispatch(self.config.shutdown_grace())
            .await;
        info!("connector service stopped");
        Ok(())
    }
}
