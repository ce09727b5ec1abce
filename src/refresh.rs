use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backends::{self, Backend};
use crate::cache::DynamicMetrics;
use crate::state::ProxyState;

/// Drives refresh cycles until `shutdown` fires. One instance per
/// process; request handlers only ever read what this task writes.
pub async fn run(state: Arc<ProxyState>, shutdown: CancellationToken) {
	loop {
		let tick = async {
			let started = Instant::now();
			refresh_once(&state).await;
			// Keep the period stable even when probes were slow.
			let pause = state
				.config
				.metrics_cache_ttl
				.saturating_sub(started.elapsed());
			tokio::time::sleep(pause).await;
		};
		tokio::select! {
			_ = shutdown.cancelled() => {
				info!("cache refresher stopped");
				return;
			},
			_ = tick => {},
		}
	}
}

/// One full cycle: discover providers still missing, probe every known
/// backend concurrently, then commit the results under one timestamp.
pub async fn refresh_once(state: &ProxyState) {
	let urls: Vec<String> = state.cache.urls().map(str::to_string).collect();

	// Static phase: (re)try discovery for backends that still lack a
	// provider, so a backend that was unreachable at boot joins the pool
	// once it comes up.
	for url in &urls {
		if state.cache.static_info(url).is_some() {
			continue;
		}
		match backends::discover(&state.client, url).await {
			Ok(info) => {
				info!(backend = %url, provider = %info.provider, model = %info.model_name, "discovered backend");
				state.cache.record_static(url, info);
			},
			Err(e) => {
				error!(backend = %url, "discovery failed: {e}; will retry next cycle");
			},
		}
	}

	// Dynamic phase: one probe task per backend with a known provider,
	// all in flight at once so the cycle lasts as long as the slowest
	// backend rather than the sum of all of them.
	let mut probes = Vec::new();
	for url in &urls {
		let Some(info) = state.cache.static_info(url) else {
			continue;
		};
		let backend = Backend::new(url.clone(), info.provider);
		let client = state.client.clone();
		let limits = state.config.queue_limits();
		probes.push((
			url.clone(),
			tokio::spawn(async move { backend.fetch_metrics(&client, limits).await }),
		));
	}
	let mut results = Vec::with_capacity(probes.len());
	for (url, handle) in probes {
		results.push((url, handle.await));
	}

	// Commit phase: whole-record replacement, one timestamp for the tick.
	// A probe task that did not complete marks its backend unavailable.
	let now = SystemTime::now();
	for (url, outcome) in results {
		let metrics = match outcome {
			Ok((load, ready)) => DynamicMetrics {
				timestamp: now,
				requests_processing: load,
				ready,
			},
			Err(e) => {
				warn!(backend = %url, "metrics probe did not complete: {e}");
				DynamicMetrics {
					timestamp: now,
					requests_processing: f64::INFINITY,
					ready: false,
				}
			},
		};
		state.cache.record_dynamic(&url, metrics);
	}
}
