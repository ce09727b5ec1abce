use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use url::Url;

/// Queue-depth ceilings applied when refining readiness from scraped
/// metrics. A backend at or above either limit is not selectable even if
/// its health endpoint reports ok.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
	pub max_requests_processing: f64,
	pub max_requests_deferred: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub proxy_addr: SocketAddr,
	/// Fixed backend pool; base URLs, normalized without a trailing slash.
	pub backends: Vec<String>,
	/// Refresh period of the metrics cache.
	pub metrics_cache_ttl: Duration,
	/// Outbound timeout for forwarded requests.
	pub backend_timeout: Duration,
	pub max_allowed_request_queue: u64,
	pub max_allowed_deferred: u64,
}

impl Config {
	pub fn from_env() -> anyhow::Result<Config> {
		let backends = parse_backends(&parse::<String>("BACKENDS")?.unwrap_or_default())?;
		let ttl = parse_default::<f64>("METRICS_CACHE_TTL_SECONDS", 3.0)?;
		if !ttl.is_finite() || ttl <= 0.0 {
			bail!("METRICS_CACHE_TTL_SECONDS must be a positive number of seconds, got {ttl}");
		}
		Ok(Config {
			proxy_addr: parse_default("PROXY_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
			backends,
			metrics_cache_ttl: Duration::from_secs_f64(ttl),
			backend_timeout: Duration::from_secs(parse_default("BACKEND_TIMEOUT_SECONDS", 300u64)?),
			max_allowed_request_queue: parse_default("MAX_ALLOWED_REQUEST_QUEUE", 4)?,
			max_allowed_deferred: parse_default("MAX_ALLOWED_DEFERRED", 2)?,
		})
	}

	/// Maximum age of a dynamic record the selector still trusts: one
	/// missed refresh tick of grace before a backend is quarantined.
	pub fn staleness_window(&self) -> Duration {
		self.metrics_cache_ttl * 2
	}

	pub fn queue_limits(&self) -> QueueLimits {
		QueueLimits {
			max_requests_processing: self.max_allowed_request_queue as f64,
			max_requests_deferred: self.max_allowed_deferred as f64,
		}
	}
}

fn parse_backends(raw: &str) -> anyhow::Result<Vec<String>> {
	let backends: Vec<String> = raw
		.split(',')
		.map(str::trim)
		.filter(|b| !b.is_empty())
		.map(|b| b.trim_end_matches('/').to_string())
		.collect();
	if backends.is_empty() {
		bail!("no BACKENDS configured");
	}
	for backend in &backends {
		Url::parse(backend).with_context(|| format!("invalid backend URL {backend:?}"))?;
	}
	Ok(backends)
}

fn parse<T: FromStr>(env: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: ToString,
{
	match env::var(env) {
		Ok(val) => val
			.parse()
			.map(|v| Some(v))
			.map_err(|e: <T as FromStr>::Err| {
				anyhow::anyhow!("invalid env var {}={} ({})", env, val, e.to_string())
			}),
		Err(_) => Ok(None),
	}
}

fn parse_default<T: FromStr>(env: &str, default: T) -> anyhow::Result<T>
where
	<T as FromStr>::Err: ToString,
{
	parse(env).map(|v| v.unwrap_or(default))
}
