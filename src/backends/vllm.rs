//! vLLM probe dialect. vLLM's `/health` answers an empty 200 rather
//! than a JSON document, and its scheduler exposes
//! `num_requests_running` / `num_requests_waiting` gauges, which map
//! onto the same processing/deferred queue gates as llama.cpp.

use std::time::Duration;

use tracing::warn;

use super::queue_gauges;
use crate::config::QueueLimits;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);
const METRICS_TIMEOUT: Duration = Duration::from_secs(5);

const RUNNING: [&str; 2] = ["vllm:num_requests_running", "vllm_num_requests_running"];
const WAITING: [&str; 2] = ["vllm:num_requests_waiting", "vllm_num_requests_waiting"];

/// GET `<backend>/health`; any 2xx counts as healthy.
pub async fn fetch_health(client: &reqwest::Client, url: &str) -> bool {
	let result = client
		.get(format!("{url}/health"))
		.timeout(HEALTH_TIMEOUT)
		.send()
		.await
		.and_then(|resp| resp.error_for_status());
	match result {
		Ok(_) => true,
		Err(e) => {
			warn!(backend = %url, "health check failed: {e}");
			false
		},
	}
}

/// Scrapes the scheduler gauges and folds them into the health verdict,
/// mirroring the llama.cpp probe's fallbacks.
pub async fn fetch_metrics(
	client: &reqwest::Client,
	url: &str,
	limits: QueueLimits,
) -> (f64, bool) {
	let (running, waiting) = match scrape_queue(client, url).await {
		Ok(found) => found,
		Err(e) => {
			warn!(backend = %url, "metrics fetch failed: {e}; will rely on health check");
			(None, None)
		},
	};

	let mut ready = fetch_health(client, url).await;
	if let (Some(running), Some(waiting)) = (running, waiting) {
		if running >= limits.max_requests_processing {
			ready = false;
		}
		if waiting >= limits.max_requests_deferred {
			ready = false;
		}
	}

	(running.unwrap_or(0.0), ready)
}

async fn scrape_queue(
	client: &reqwest::Client,
	url: &str,
) -> anyhow::Result<(Option<f64>, Option<f64>)> {
	let resp = client
		.get(format!("{url}/metrics"))
		.timeout(METRICS_TIMEOUT)
		.send()
		.await?;
	if resp.status() != http::StatusCode::OK {
		return Ok((None, None));
	}
	let text = resp.text().await?;
	Ok(queue_gauges(&text, RUNNING, WAITING)?)
}
