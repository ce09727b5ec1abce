pub mod llamacpp;
pub mod vllm;

use std::fmt;
use std::str::FromStr;

use prometheus_parse::{Scrape, Value};
use serde::{Deserialize, Serialize};

use crate::cache::StaticInfo;
use crate::config::QueueLimits;

/// The inference engine families the proxy can front. The kind decides
/// which probe dialect a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
	Llamacpp,
	Vllm,
}

impl BackendKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			BackendKind::Llamacpp => "llamacpp",
			BackendKind::Vllm => "vllm",
		}
	}
}

impl fmt::Display for BackendKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(thiserror::Error, Debug)]
#[error("unknown provider {0:?}")]
pub struct UnknownProvider(pub String);

impl FromStr for BackendKind {
	type Err = UnknownProvider;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"llamacpp" => Ok(BackendKind::Llamacpp),
			"vllm" => Ok(BackendKind::Vllm),
			other => Err(UnknownProvider(other.to_string())),
		}
	}
}

/// A forwarding target: one pool member plus the probe dialect it
/// speaks.
#[derive(Debug, Clone)]
pub struct Backend {
	pub url: String,
	pub kind: BackendKind,
}

impl Backend {
	pub fn new(url: impl Into<String>, kind: BackendKind) -> Backend {
		Backend {
			url: url.into(),
			kind,
		}
	}

	/// Basic readiness as reported by the engine itself. Never errors;
	/// anything short of a healthy answer is `false`.
	pub async fn fetch_health(&self, client: &reqwest::Client) -> bool {
		match self.kind {
			BackendKind::Llamacpp => llamacpp::fetch_health(client, &self.url).await,
			BackendKind::Vllm => vllm::fetch_health(client, &self.url).await,
		}
	}

	/// Current load plus gated readiness, `(requests_processing, ready)`.
	/// Total over failures: an unreachable or unparsable backend comes
	/// back as load 0 with readiness decided by the health probe alone.
	pub async fn fetch_metrics(&self, client: &reqwest::Client, limits: QueueLimits) -> (f64, bool) {
		match self.kind {
			BackendKind::Llamacpp => llamacpp::fetch_metrics(client, &self.url, limits).await,
			BackendKind::Vllm => vllm::fetch_metrics(client, &self.url, limits).await,
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
	#[error("request failed: {0}")]
	Request(#[from] reqwest::Error),
	#[error("backend reported no models")]
	NoModels,
	#[error("model {0:?} missing from /v1/models listing")]
	ModelNotListed(String),
	#[error(transparent)]
	Provider(#[from] UnknownProvider),
}

#[derive(Debug, Deserialize)]
struct ModelList {
	#[serde(default)]
	data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
	id: String,
	#[serde(default)]
	owned_by: String,
}

async fn list_models(client: &reqwest::Client, url: &str) -> Result<ModelList, DiscoveryError> {
	Ok(
		client
			.get(format!("{url}/v1/models"))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?,
	)
}

/// The model a backend serves, taken from its first `/v1/models` entry.
pub async fn fetch_model_name(
	client: &reqwest::Client,
	url: &str,
) -> Result<String, DiscoveryError> {
	let models = list_models(client, url).await?;
	models
		.data
		.into_iter()
		.next()
		.map(|m| m.id)
		.ok_or(DiscoveryError::NoModels)
}

/// The provider family owning `model`, from the `owned_by` field of its
/// `/v1/models` entry.
pub async fn fetch_provider(
	client: &reqwest::Client,
	url: &str,
	model: &str,
) -> Result<BackendKind, DiscoveryError> {
	let models = list_models(client, url).await?;
	let entry = models
		.data
		.into_iter()
		.find(|m| m.id == model)
		.ok_or_else(|| DiscoveryError::ModelNotListed(model.to_string()))?;
	Ok(entry.owned_by.parse()?)
}

/// One-shot static discovery for a configured backend.
pub async fn discover(client: &reqwest::Client, url: &str) -> Result<StaticInfo, DiscoveryError> {
	let model_name = fetch_model_name(client, url).await?;
	let provider = fetch_provider(client, url, &model_name).await?;
	Ok(StaticInfo {
		provider,
		model_name,
	})
}

/// Pulls the two queue gauges out of a Prometheus text scrape. Each
/// gauge is looked up under both its colon-namespaced and
/// underscore-flattened family name; a family that is absent stays
/// `None`.
pub(crate) fn queue_gauges(
	text: &str,
	processing_names: [&str; 2],
	deferred_names: [&str; 2],
) -> std::io::Result<(Option<f64>, Option<f64>)> {
	let scrape = Scrape::parse(text.lines().map(|line| Ok(line.to_string())))?;
	let mut processing = None;
	let mut deferred = None;
	for sample in scrape.samples {
		if processing_names.contains(&sample.metric.as_str()) {
			processing = numeric_value(&sample.value);
		} else if deferred_names.contains(&sample.metric.as_str()) {
			deferred = numeric_value(&sample.value);
		}
		if processing.is_some() && deferred.is_some() {
			break;
		}
	}
	Ok((processing, deferred))
}

fn numeric_value(value: &Value) -> Option<f64> {
	match value {
		Value::Gauge(v) | Value::Counter(v) | Value::Untyped(v) => Some(*v),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[test]
	fn kind_round_trips_through_its_name() {
		assert_eq!("llamacpp".parse::<BackendKind>().unwrap(), BackendKind::Llamacpp);
		assert_eq!("vllm".parse::<BackendKind>().unwrap(), BackendKind::Vllm);
		assert_eq!(BackendKind::Llamacpp.to_string(), "llamacpp");
		assert!("openai".parse::<BackendKind>().is_err());
	}

	#[test]
	fn queue_gauges_accept_both_family_spellings() {
		let colon = "# TYPE llamacpp:requests_processing gauge\n\
			llamacpp:requests_processing 3\n\
			# TYPE llamacpp:requests_deferred gauge\n\
			llamacpp:requests_deferred 1\n";
		let (processing, deferred) = queue_gauges(
			colon,
			["llamacpp:requests_processing", "llamacpp_requests_processing"],
			["llamacpp:requests_deferred", "llamacpp_requests_deferred"],
		)
		.unwrap();
		assert_eq!(processing, Some(3.0));
		assert_eq!(deferred, Some(1.0));

		let underscore = "llamacpp_requests_processing 7\nllamacpp_requests_deferred 0\n";
		let (processing, deferred) = queue_gauges(
			underscore,
			["llamacpp:requests_processing", "llamacpp_requests_processing"],
			["llamacpp:requests_deferred", "llamacpp_requests_deferred"],
		)
		.unwrap();
		assert_eq!(processing, Some(7.0));
		assert_eq!(deferred, Some(0.0));
	}

	#[test]
	fn missing_families_stay_unset() {
		let (processing, deferred) = queue_gauges(
			"llamacpp:requests_processing 2\nsomething_else 9\n",
			["llamacpp:requests_processing", "llamacpp_requests_processing"],
			["llamacpp:requests_deferred", "llamacpp_requests_deferred"],
		)
		.unwrap();
		assert_eq!(processing, Some(2.0));
		assert_eq!(deferred, None);
	}

	#[tokio::test]
	async fn discovery_reads_model_then_provider() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/models"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"data": [{"id": "llama-3-8b", "owned_by": "llamacpp", "object": "model"}]
			})))
			.expect(2)
			.mount(&server)
			.await;

		let client = reqwest::Client::new();
		let info = discover(&client, &server.uri()).await.unwrap();
		assert_eq!(info.provider, BackendKind::Llamacpp);
		assert_eq!(info.model_name, "llama-3-8b");
	}

	#[tokio::test]
	async fn discovery_rejects_unknown_providers() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/models"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"data": [{"id": "gpt-x", "owned_by": "acme"}]
			})))
			.mount(&server)
			.await;

		let client = reqwest::Client::new();
		let err = discover(&client, &server.uri()).await.unwrap_err();
		assert!(matches!(err, DiscoveryError::Provider(_)));
	}

	#[tokio::test]
	async fn discovery_requires_at_least_one_model() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/models"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
			.mount(&server)
			.await;

		let client = reqwest::Client::new();
		let err = discover(&client, &server.uri()).await.unwrap_err();
		assert!(matches!(err, DiscoveryError::NoModels));
	}
}
