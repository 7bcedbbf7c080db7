pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use models::config::AppConfig;
use services::colorizer::ColorizerService;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub colorizer: ColorizerService,
    pub colorize_semaphore: Semaphore,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            colorizer: ColorizerService::new(),
            colorize_semaphore: Semaphore::new(config.max_parallel_colorize),
            config,
        }
    }
}

async fn request_id_middleware(request: Request<Body>, next: middleware::Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("X-Request-Id", request_id.parse().unwrap());
    response
}

pub fn app(state: Arc<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(|response: &Response, latency: std::time::Duration, _span: &Span| {
            tracing::info!(
                status = response.status().as_u16(),
                latency_ms = latency.as_millis() as u64,
                "response",
            );
        });

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/colorize", post(handlers::colorize::colorize))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes as usize))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
