use std::time::Duration;

use tracing::warn;

use super::queue_gauges;
use crate::config::QueueLimits;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);
const METRICS_TIMEOUT: Duration = Duration::from_secs(5);

const PROCESSING: [&str; 2] = [
	"llamacpp:requests_processing",
	"llamacpp_requests_processing",
];
const DEFERRED: [&str; 2] = ["llamacpp:requests_deferred", "llamacpp_requests_deferred"];

/// GET `<backend>/health`; healthy iff 2xx and the JSON body reports
/// `status == "ok"`.
pub async fn fetch_health(client: &reqwest::Client, url: &str) -> bool {
	match health(client, url).await {
		Ok(ok) => ok,
		Err(e) => {
			warn!(backend = %url, "health check failed: {e}");
			false
		},
	}
}

async fn health(client: &reqwest::Client, url: &str) -> reqwest::Result<bool> {
	let body: serde_json::Value = client
		.get(format!("{url}/health"))
		.timeout(HEALTH_TIMEOUT)
		.send()
		.await?
		.error_for_status()?
		.json()
		.await?;
	Ok(body.get("status").and_then(|s| s.as_str()) == Some("ok"))
}

/// Scrapes the llama.cpp server's queue gauges and folds them into the
/// health verdict. When the scrape fails, readiness falls back to the
/// health endpoint alone and the queue depth counts as unknown (zero
/// for selection purposes).
pub async fn fetch_metrics(
	client: &reqwest::Client,
	url: &str,
	limits: QueueLimits,
) -> (f64, bool) {
	let (processing, deferred) = match scrape_queue(client, url).await {
		Ok(found) => found,
		Err(e) => {
			warn!(backend = %url, "metrics fetch failed: {e}; will rely on health check");
			(None, None)
		},
	};

	let mut ready = fetch_health(client, url).await;
	if let (Some(processing), Some(deferred)) = (processing, deferred) {
		if processing >= limits.max_requests_processing {
			ready = false;
		}
		if deferred >= limits.max_requests_deferred {
			ready = false;
		}
	}

	(processing.unwrap_or(0.0), ready)
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
	Ok(queue_gauges(&text, PROCESSING, DEFERRED)?)
}
