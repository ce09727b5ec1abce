use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::cache::{self, BackendStatus};
use crate::state::ProxyState;
use crate::{forward, selector};

#[derive(Clone)]
pub struct App {
	state: Arc<ProxyState>,
}

impl App {
	pub fn new(state: Arc<ProxyState>) -> App {
		App { state }
	}

	pub fn router(&self) -> Router {
		// The fixed routes win over the proxy catch-all regardless of
		// registration order; axum routes by most specific path.
		Router::new()
			.route("/", get(index_handler))
			.route("/health", get(health_handler))
			.route("/{*path}", any(proxy_handler))
			.layer(CorsLayer::permissive())
			.with_state(self.clone())
	}
}

async fn index_handler() -> Json<serde_json::Value> {
	Json(json!({
		"message": "Welcome to vLLM/llama.cpp inference engine proxy server!"
	}))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
	status: &'static str,
	available_backends: Vec<String>,
	total_backends: usize,
	#[serde(serialize_with = "cache::epoch_seconds")]
	timestamp: SystemTime,
	details: Vec<BackendStatus>,
}

/// Reports the pool as the refresher last saw it. A pure cache read so
/// liveness probes stay cheap no matter how the backends behave.
async fn health_handler(State(app): State<App>) -> Json<HealthResponse> {
	let details = app.state.cache.snapshot();
	let available_backends: Vec<String> = details
		.iter()
		.filter(|d| d.ready)
		.map(|d| d.backend.clone())
		.collect();
	let status = if available_backends.is_empty() {
		"degraded"
	} else {
		"ok"
	};
	Json(HealthResponse {
		status,
		available_backends,
		total_backends: details.len(),
		timestamp: SystemTime::now(),
		details,
	})
}

async fn proxy_handler(
	State(app): State<App>,
	Path(path): Path<String>,
	req: Request,
) -> Response {
	let Some(backend) =
		selector::choose_backend(&app.state.cache, app.state.config.staleness_window())
	else {
		return (StatusCode::SERVICE_UNAVAILABLE, "No backend available").into_response();
	};
	forward::forward(&app.state, &backend, &path, req).await
}
