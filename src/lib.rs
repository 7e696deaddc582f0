use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

pub mod breakpoints;
pub mod cache;
pub mod config;
pub mod filename;
pub mod markup;
pub mod render;
pub mod resolution;
pub mod responder;
pub mod source;
pub mod transform;
pub mod version;

use crate::cache::{CachePolicy, CacheStatus, DiskCache, ResizeEngine};
use crate::config::{ConfigError, RespImgConfig};
use crate::render::{RenderOptions, Renderer};
use crate::responder::{Outcome, Responder, ServedFile};
use crate::source::{FsSourceStore, InMemoryMetaCache, SourceStore};
use crate::transform::{ImageCrateTransformer, ImageTransformer, TransformError};
use crate::version::Versioner;

#[derive(Error, Debug)]
pub enum RespImgError {
    #[error("Malformed image request: {0}")]
    MalformedRequest(String),
    #[error("Source image not found: {0}")]
    SourceNotFound(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Resize failed: {0}")]
    Resize(#[from] TransformError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RespImgError {
    pub fn status(&self) -> StatusCode {
        match self {
            RespImgError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            RespImgError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            RespImgError::Config(
                ConfigError::InvalidOptions(_)
                | ConfigError::InvalidWidths(_)
                | ConfigError::InvalidMaxResolution(_)
                | ConfigError::InvalidResolutionStep(_)
                | ConfigError::TooManyDensities { .. },
            ) => StatusCode::BAD_REQUEST,
            RespImgError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RespImgError::Resize(e) if e.is_decode() => StatusCode::UNPROCESSABLE_ENTITY,
            RespImgError::Resize(_) | RespImgError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RespImgError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        CachePolicy::no_cache().apply(&mut headers);
        (self.status(), headers, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RespImgError>;

/// Request counters, exposed on `/metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub generated: AtomicU64,
    pub redirects: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn prometheus_text(&self) -> String {
        let counters = [
            ("respimg_cache_hits_total", "Total number of cache hits", &self.cache_hits),
            ("respimg_generated_total", "Total number of generated variants", &self.generated),
            ("respimg_redirects_total", "Total number of stale-version redirects", &self.redirects),
            ("respimg_errors_total", "Total number of failed image requests", &self.errors),
        ];
        counters
            .iter()
            .map(|(name, help, value)| {
                format!(
                    "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                    value.load(Ordering::Relaxed)
                )
            })
            .collect()
    }
}

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RespImgConfig>,
    pub responder: Responder,
    pub transformer: Arc<dyn ImageTransformer>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Filesystem sources and the `image` crate pipeline.
    pub fn new(config: RespImgConfig) -> Self {
        Self::with_transformer(config, Arc::new(ImageCrateTransformer))
    }

    pub fn with_transformer(config: RespImgConfig, transformer: Arc<dyn ImageTransformer>) -> Self {
        let sources: Arc<dyn SourceStore> = Arc::new(FsSourceStore::new(
            config.source_dir.clone(),
            config.source_extensions.clone(),
        ));
        let versioner = Versioner::new(
            config.versioning,
            config.app_version.clone(),
            config.public_url_prefix.clone(),
            sources,
        );
        let engine = ResizeEngine::new(transformer.clone(), DiskCache::new(config.cache_dir.clone()), &config);
        Self {
            config: Arc::new(config),
            responder: Responder::new(versioner, engine),
            transformer,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Renderer with a metadata cache scoped to one request.
    pub fn renderer(&self) -> Renderer {
        Renderer::new(
            self.config.clone(),
            self.responder.versioner().clone(),
            self.transformer.clone(),
            Arc::new(InMemoryMetaCache::new()),
        )
    }
}

async fn image_handler(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    match state.responder.handle(&path).await {
        Ok(Outcome::Redirect(url)) => {
            state.metrics.redirects.fetch_add(1, Ordering::Relaxed);
            let mut headers = HeaderMap::new();
            CachePolicy::no_cache().apply(&mut headers);
            match HeaderValue::from_str(&url) {
                Ok(location) => {
                    headers.insert(header::LOCATION, location);
                    (StatusCode::MOVED_PERMANENTLY, headers).into_response()
                }
                Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Invalid redirect target").into_response(),
            }
        }
        Ok(Outcome::Serve(file)) => {
            let counter = match file.status {
                CacheStatus::Hit => &state.metrics.cache_hits,
                CacheStatus::Generated => &state.metrics.generated,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            serve_file(file, state.config.debug_headers).await
        }
        Err(e) => {
            state.metrics.errors.fetch_add(1, Ordering::Relaxed);
            match &e {
                RespImgError::MalformedRequest(_) | RespImgError::SourceNotFound(_) => {
                    tracing::debug!("Rejected image request {}: {}", path, e)
                }
                _ => tracing::error!("Failed to serve {}: {}", path, e),
            }
            e.into_response()
        }
    }
}

async fn serve_file(file: ServedFile, debug_headers: bool) -> Response {
    let handle = match tokio::fs::File::open(&file.path).await {
        Ok(f) => f,
        Err(e) => return RespImgError::Io(e).into_response(),
    };

    let mut headers = HeaderMap::new();
    if let Ok(content_type) = HeaderValue::from_str(file.content_type.as_ref()) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.len));
    if let Ok(etag) = HeaderValue::from_str(&file.etag) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(modified) = file.modified {
        if let Ok(value) = HeaderValue::from_str(&cache::headers::http_date(modified)) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    CachePolicy::versioned().apply(&mut headers);
    if debug_headers {
        headers.insert("x-respimg-cache", HeaderValue::from_static(file.status.as_str()));
        if let Ok(source) = HeaderValue::from_str(&file.source_path.to_string_lossy()) {
            headers.insert("x-respimg-source", source);
        }
    }

    (headers, Body::from_stream(ReaderStream::new(handle))).into_response()
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub html: String,
    pub urls: Vec<String>,
}

async fn render_handler(
    State(state): State<AppState>,
    Query(opts): Query<RenderOptions>,
) -> std::result::Result<Json<RenderResponse>, RespImgError> {
    let renderer = state.renderer();
    match renderer.plan(&opts).await {
        Ok(plan) => {
            let html = renderer.markup(&plan, &opts);
            Ok(Json(RenderResponse { html, urls: plan.urls.into_values().collect() }))
        }
        Err(e) => match render::placeholder_for(&opts.file, &e) {
            Some(html) => {
                tracing::debug!("Rendering placeholder for {}: {}", opts.file, e);
                Ok(Json(RenderResponse { html, urls: Vec::new() }))
            }
            None => Err(e),
        },
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub deleted: u64,
}

#[derive(Debug, Deserialize)]
struct PurgeImageQuery {
    path: String,
}

async fn purge_expired_handler(State(state): State<AppState>) -> std::result::Result<Json<PurgeResponse>, RespImgError> {
    let ttl = Duration::from_secs(state.config.cache_ttl_secs);
    let deleted = state.responder.cache().purge_expired(ttl).await?;
    Ok(Json(PurgeResponse { deleted }))
}

async fn purge_image_handler(
    State(state): State<AppState>,
    Query(query): Query<PurgeImageQuery>,
) -> std::result::Result<Json<PurgeResponse>, RespImgError> {
    let deleted = state.responder.cache().purge_image(&query.path).await?;
    Ok(Json(PurgeResponse { deleted }))
}

async fn purge_all_handler(State(state): State<AppState>) -> std::result::Result<Json<PurgeResponse>, RespImgError> {
    let deleted = state.responder.cache().purge_all().await?;
    Ok(Json(PurgeResponse { deleted }))
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "respimg"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.prometheus_text(),
    )
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(state): State<AppState>) -> std::result::Result<impl IntoResponse, RespImgError> {
    let stats = state.responder.cache().stats().await?;
    Ok(Json(serde_json::json!({
        "cache": {
            "entry_count": stats.entry_count,
            "total_size_bytes": stats.total_size_bytes,
            "total_size_mb": stats.total_size_bytes as f64 / 1024.0 / 1024.0,
            "ttl_secs": state.config.cache_ttl_secs,
        },
        "requests": {
            "cache_hits": state.metrics.cache_hits.load(Ordering::Relaxed),
            "generated": state.metrics.generated.load(Ordering::Relaxed),
            "redirects": state.metrics.redirects.load(Ordering::Relaxed),
            "errors": state.metrics.errors.load(Ordering::Relaxed),
        }
    })))
}

/// Builds the full service: variant route under the public prefix, render and
/// admin endpoints, and observability.
pub fn router(state: AppState) -> Router {
    let image_route = format!("{}*path", state.config.public_url_prefix);
    tracing::info!("Serving variants under {}", state.config.public_url_prefix);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/render", get(render_handler))
        .route("/admin/purge/expired", post(purge_expired_handler))
        .route("/admin/purge/image", post(purge_image_handler))
        .route("/admin/purge/all", post(purge_all_handler))
        .route(&image_route, get(image_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
