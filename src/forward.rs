use std::convert::Infallible;

use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderName, StatusCode, header};
use tracing::{error, info, warn};

use crate::backends::Backend;
use crate::state::ProxyState;

/// Inbound bodies are buffered in full before the outbound send starts;
/// this is the upload size ceiling. Streaming uploads are deliberately
/// not supported.
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Hop-by-hop and transport-negotiated headers that must not be copied
/// between the client-facing and backend-facing exchanges, in either
/// direction.
fn is_excluded(name: &HeaderName) -> bool {
	matches!(
		name.as_str(),
		"content-encoding"
			| "connection"
			| "keep-alive"
			| "proxy-authenticate"
			| "proxy-authorization"
			| "te"
			| "trailers"
			| "upgrade"
			| "proxy-connection"
			| "content-length"
	)
}

/// Copies `headers` minus the excluded set. Header names are already
/// normalized to lowercase, so the match is case-insensitive; repeated
/// values survive the copy.
pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
	let mut out = HeaderMap::with_capacity(headers.len());
	for (name, value) in headers {
		if !is_excluded(name) {
			out.append(name.clone(), value.clone());
		}
	}
	out
}

/// Logs the release of the backend-facing response. The generator that
/// owns it is the handle's single closer, so this fires exactly once
/// per streamed response, on every exit path. `interrupted` stays set
/// when the generator is dropped before the upstream body finished,
/// which is how a client disconnect manifests.
struct StreamGuard {
	backend: String,
	interrupted: bool,
}

impl Drop for StreamGuard {
	fn drop(&mut self) {
		if self.interrupted {
			warn!(backend = %self.backend, "stream interrupted, likely by client disconnection");
		}
		info!(backend = %self.backend, "backend response stream closed");
	}
}

/// Forwards one request to `backend`, bridging the response back either
/// buffered or, for SSE, chunk by chunk as the backend produces it.
pub async fn forward(state: &ProxyState, backend: &Backend, path: &str, req: Request) -> Response {
	let (parts, body) = req.into_parts();

	let mut target = format!("{}/{}", backend.url, path);
	if let Some(query) = parts.uri.query() {
		target.push('?');
		target.push_str(query);
	}

	let mut headers = filter_headers(&parts.headers);
	headers.remove(header::HOST);

	let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
		Ok(body) => body,
		Err(e) => {
			warn!("failed to buffer request body: {e}");
			return (StatusCode::BAD_REQUEST, "Failed to read request body.").into_response();
		},
	};

	let sent = state
		.client
		.request(parts.method.clone(), target)
		.headers(headers)
		.body(body)
		.timeout(state.config.backend_timeout)
		.send()
		.await;
	let upstream = match sent {
		Ok(resp) => resp,
		Err(e) if e.is_connect() => {
			error!(backend = %backend.url, "cannot connect to backend service: {e}");
			return (StatusCode::SERVICE_UNAVAILABLE, "Backend service is unavailable.")
				.into_response();
		},
		Err(e) => {
			warn!(backend = %backend.url, "forwarding request failed: {e}");
			return (StatusCode::BAD_GATEWAY, "Bad gateway").into_response();
		},
	};

	let status = upstream.status();
	let headers = filter_headers(upstream.headers());
	let content_type = upstream
		.headers()
		.get(header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("");

	let body = if content_type.to_ascii_lowercase().contains("text/event-stream") {
		sse_bridge(upstream, backend.url.clone())
	} else {
		match upstream.bytes().await {
			Ok(bytes) => Body::from(bytes),
			Err(e) => {
				warn!(backend = %backend.url, "failed to read backend response: {e}");
				return (StatusCode::BAD_GATEWAY, "Bad gateway").into_response();
			},
		}
	};

	let mut resp = Response::builder()
		.status(status)
		.body(body)
		.expect("builder with known status code should not fail");
	*resp.headers_mut() = headers;
	resp
}

/// Lazy bridge from the backend's SSE body to the client. The
/// `reqwest::Response` lives inside the generator, so the upstream
/// connection stays open exactly as long as the client keeps reading
/// and is released when the generator terminates or is dropped.
fn sse_bridge(upstream: reqwest::Response, backend: String) -> Body {
	let stream = async_stream::stream! {
		let mut guard = StreamGuard { backend, interrupted: true };
		let mut chunks = upstream.bytes_stream();
		loop {
			match chunks.next().await {
				Some(Ok(bytes)) => yield Ok::<Bytes, Infallible>(bytes),
				Some(Err(e)) => {
					guard.interrupted = false;
					warn!(backend = %guard.backend, "stream interrupted, likely by client disconnection: {e}");
					break;
				},
				None => {
					guard.interrupted = false;
					break;
				},
			}
		}
	};
	Body::from_stream(stream)
}
