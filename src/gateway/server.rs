//! # HTTP Server Module
//!
//! Axum front end of the gateway.
//!
//! ## Routes
//! - `GET /?p=<provider>&t=<type>&i=<id>[&q=<quality>][&c=<callback>]`:
//!   the serialized `SongList`, JSONP-wrapped as `callback(<json>);` when a
//!   callback is given. Always HTTP 200, failures are reported in the body.
//! - `GET /health`: cache backend probe
//! - `GET /providers`: supported (provider, request type) combinations
//! - `GET /metrics`: Prometheus exposition, when metrics are enabled
//!
//! Every request runs inside a `TraceLayer` span carrying a correlation id,
//! which is echoed in the `x-correlation-id` response header.

use axum::{
    body::Body,
    extract::{RawQuery, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router as AxumRouter,
};
use metrics::histogram;
use serde_json::json;
use std::future::Future;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, instrument};

use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Quality, SongList};
use crate::gateway::service::{MusicRequest, MusicService};
use crate::observability::{CorrelationId, MetricsHandle};

/// Header carrying the correlation id
pub const CORRELATION_HEADER: &str = "x-correlation-id";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const JSONP_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";
const FALLBACK_BODY: &[u8] = br#"{"status":"failed","msg":"internal error","songs":[]}"#;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: MusicService,
    pub metrics: Option<MetricsHandle>,
}

impl AppState {
    pub fn new(service: MusicService) -> Self {
        Self { service, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Query parameters of the music endpoint
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MusicQuery {
    pub provider: String,
    pub request_type: String,
    pub id: String,
    pub quality: String,
    pub callback: String,
}

impl MusicQuery {
    /// Parse a raw query string. Unknown keys are ignored and the first value of a key wins.
    pub fn parse(raw: &str) -> Self {
        let mut query = Self::default();
        let mut seen = [false; 5];

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let (slot, field) = match key.as_ref() {
                "p" => (0, &mut query.provider),
                "t" => (1, &mut query.request_type),
                "i" => (2, &mut query.id),
                "q" => (3, &mut query.quality),
                "c" => (4, &mut query.callback),
                _ => continue,
            };
            if !seen[slot] {
                seen[slot] = true;
                *field = value.into_owned();
            }
        }
        query
    }

    pub fn to_request(&self) -> MusicRequest {
        MusicRequest::new(self.provider.trim(), self.request_type.trim(), self.id.trim())
            .with_quality(Quality::parse(&self.quality))
    }
}

/// JSONP callbacks are restricted to JavaScript identifier paths
fn valid_callback(callback: &str) -> Option<&str> {
    let callback = callback.trim();
    let valid = !callback.is_empty()
        && callback.len() <= 128
        && callback
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
    valid.then_some(callback)
}

/// Render a result as JSON or JSONP
pub fn render_song_list(result: &SongList, callback: &str) -> Response {
    let body = result.to_json_bytes().unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize song list");
        FALLBACK_BODY.to_vec()
    });

    let (content_type, body) = match valid_callback(callback) {
        Some(callback) => {
            let mut wrapped = Vec::with_capacity(body.len() + callback.len() + 3);
            wrapped.extend_from_slice(callback.as_bytes());
            wrapped.push(b'(');
            wrapped.extend_from_slice(&body);
            wrapped.extend_from_slice(b");");
            (JSONP_CONTENT_TYPE, wrapped)
        }
        None => (JSON_CONTENT_TYPE, body),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        body,
    )
        .into_response()
}

/// Build the application router
pub fn router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/", get(music_handler))
        .route("/health", get(health_handler))
        .route("/providers", get(providers_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let correlation_id = request
                .extensions()
                .get::<CorrelationId>()
                .map(|id| id.to_string())
                .unwrap_or_default();
            info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                correlation_id = %correlation_id,
            )
        }))
        .layer(middleware::from_fn(correlation_id))
        .with_state(state)
}

/// Attach a correlation id to the request and echo it in the response
async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(|v| CorrelationId::from_string(v.to_string()))
        .unwrap_or_default();

    request.extensions_mut().insert(id.clone());
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn music_handler(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    let started = Instant::now();
    let query = MusicQuery::parse(raw.as_deref().unwrap_or_default());

    let result = state.service.handle(&query.to_request()).await;
    let response = render_song_list(&result, &query.callback);

    histogram!("gateway_request_duration_seconds").record(started.elapsed().as_secs_f64());
    response
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let cache_healthy = state.service.store().health_check().await;
    let stats = state.service.store().stats();
    let body = json!({
        "status": if cache_healthy { "healthy" } else { "unhealthy" },
        "cache": {
            "backend": state.service.store().backend().name(),
            "healthy": cache_healthy,
            "hits": stats.hits,
            "misses": stats.misses,
            "errors": stats.errors,
            "hit_ratio": stats.hit_ratio(),
        },
        "providers": state.service.aggregator().registry().len(),
    });

    let status = if cache_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn providers_handler(State(state): State<AppState>) -> Response {
    Json(state.service.aggregator().registry().supported()).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// HTTP listener of the gateway
pub struct GatewayServer {
    config: ServerConfig,
    app: AxumRouter,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            app: router(state),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until `shutdown` completes, then drain in-flight requests
    #[instrument(skip_all, fields(bind = %self.config.bind_address, port = self.config.http_port))]
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind((self.config.bind_address.as_str(), self.config.http_port))
            .await
            .map_err(|e| {
                GatewayError::config(format!(
                    "Failed to bind {}:{}: {}",
                    self.config.bind_address, self.config.http_port, e
                ))
            })?;

        info!(addr = ?listener.local_addr().ok(), "Music API gateway listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
