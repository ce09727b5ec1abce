use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::backends::BackendKind;

/// Backend identity discovered once per process life; the provider and
/// model of a live backend only change with a restart.
#[derive(Debug, Clone, Serialize)]
pub struct StaticInfo {
	pub provider: BackendKind,
	pub model_name: String,
}

/// One refresh tick's view of a backend's load.
#[derive(Debug, Clone, Serialize)]
pub struct DynamicMetrics {
	#[serde(serialize_with = "epoch_seconds")]
	pub timestamp: SystemTime,
	/// In-flight request count as reported by the engine;
	/// `f64::INFINITY` when the backend could not be probed at all.
	pub requests_processing: f64,
	pub ready: bool,
}

struct Entry {
	url: String,
	static_info: RwLock<Option<StaticInfo>>,
	dynamic: RwLock<Option<DynamicMetrics>>,
}

/// Shared backend table, read by the selector and `/health` and written
/// by the refresher. The entry set is fixed at startup (configuration
/// order is preserved); records are replaced wholesale under per-entry
/// locks so readers never observe a torn record.
pub struct MetricsCache {
	entries: Vec<Entry>,
}

/// Per-backend slice of the `/health` payload.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
	pub backend: String,
	pub ready: bool,
	pub metrics: Option<DynamicMetrics>,
}

impl MetricsCache {
	pub fn new(backends: &[String]) -> MetricsCache {
		MetricsCache {
			entries: backends
				.iter()
				.map(|url| Entry {
					url: url.clone(),
					static_info: RwLock::new(None),
					dynamic: RwLock::new(None),
				})
				.collect(),
		}
	}

	fn entry(&self, url: &str) -> Option<&Entry> {
		self.entries.iter().find(|e| e.url == url)
	}

	pub fn urls(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(|e| e.url.as_str())
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn static_info(&self, url: &str) -> Option<StaticInfo> {
		self.entry(url)?.static_info.read().unwrap().clone()
	}

	pub fn dynamic(&self, url: &str) -> Option<DynamicMetrics> {
		self.entry(url)?.dynamic.read().unwrap().clone()
	}

	/// First write wins; later discoveries for the same backend are
	/// ignored. Writes for unknown URLs are dropped (the table never
	/// grows after startup).
	pub fn record_static(&self, url: &str, info: StaticInfo) {
		if let Some(entry) = self.entry(url) {
			let mut slot = entry.static_info.write().unwrap();
			if slot.is_none() {
				*slot = Some(info);
			}
		}
	}

	pub fn record_dynamic(&self, url: &str, metrics: DynamicMetrics) {
		if let Some(entry) = self.entry(url) {
			*entry.dynamic.write().unwrap() = Some(metrics);
		}
	}

	/// Clone of every backend's current status, in configuration order.
	pub fn snapshot(&self) -> Vec<BackendStatus> {
		self
			.entries
			.iter()
			.map(|entry| {
				let metrics = entry.dynamic.read().unwrap().clone();
				BackendStatus {
					backend: entry.url.clone(),
					ready: metrics.as_ref().map(|m| m.ready).unwrap_or(false),
					metrics,
				}
			})
			.collect()
	}
}

pub fn epoch_seconds<S>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	let secs = t
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs_f64())
		.unwrap_or(0.0);
	serializer.serialize_f64(secs)
}
