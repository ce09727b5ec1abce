use std::time::{Duration, SystemTime};

use rand::seq::IndexedRandom;

use crate::backends::Backend;
use crate::cache::MetricsCache;

/// Picks the least-loaded ready backend from the cache, or none when
/// every record is missing, stale, or gated off. Ties break uniformly
/// at random; this is the only load smoothing the proxy does. Pure
/// cache read, no network I/O.
pub fn choose_backend(cache: &MetricsCache, staleness_window: Duration) -> Option<Backend> {
	let now = SystemTime::now();
	let mut candidates: Vec<(&str, f64)> = Vec::new();
	for url in cache.urls() {
		let Some(metrics) = cache.dynamic(url) else {
			continue;
		};
		if !metrics.ready {
			continue;
		}
		// Records the refresher has not touched within the grace window
		// are distrusted; future-dated records (clock skew) count as
		// fresh.
		let age = now.duration_since(metrics.timestamp).unwrap_or_default();
		if age >= staleness_window {
			continue;
		}
		candidates.push((url, metrics.requests_processing));
	}
	if candidates.is_empty() {
		return None;
	}

	let min_load = candidates
		.iter()
		.map(|(_, load)| *load)
		.fold(f64::INFINITY, f64::min);
	let winners: Vec<&str> = candidates
		.iter()
		.filter(|(_, load)| *load == min_load)
		.map(|(url, _)| *url)
		.collect();
	let url = *winners.choose(&mut rand::rng())?;

	// The static record can still be missing if discovery lost a race
	// with this tick's dynamic write; treat that as no backend.
	let info = cache.static_info(url)?;
	Some(Backend::new(url, info.provider))
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;
	use crate::backends::BackendKind;
	use crate::cache::{DynamicMetrics, StaticInfo};

	const WINDOW: Duration = Duration::from_secs(6);

	fn cache(backends: &[&str]) -> MetricsCache {
		let urls: Vec<String> = backends.iter().map(|b| b.to_string()).collect();
		let cache = MetricsCache::new(&urls);
		for url in &urls {
			cache.record_static(
				url,
				StaticInfo {
					provider: BackendKind::Llamacpp,
					model_name: "m".to_string(),
				},
			);
		}
		cache
	}

	fn record(cache: &MetricsCache, url: &str, load: f64, ready: bool, age: Duration) {
		cache.record_dynamic(
			url,
			DynamicMetrics {
				timestamp: SystemTime::now() - age,
				requests_processing: load,
				ready,
			},
		);
	}

	#[test]
	fn unready_backends_are_never_chosen() {
		let cache = cache(&["http://a", "http://b"]);
		record(&cache, "http://a", 0.0, false, Duration::ZERO);
		record(&cache, "http://b", 10.0, true, Duration::ZERO);
		for _ in 0..50 {
			let backend = choose_backend(&cache, WINDOW).unwrap();
			assert_eq!(backend.url, "http://b");
		}
	}

	#[test]
	fn stale_records_are_distrusted() {
		let cache = cache(&["http://a"]);
		record(&cache, "http://a", 0.0, true, Duration::from_secs(7));
		assert!(choose_backend(&cache, WINDOW).is_none());
	}

	#[test]
	fn empty_and_unrefreshed_cache_yields_none() {
		let cache = cache(&["http://a"]);
		assert!(choose_backend(&cache, WINDOW).is_none());
	}

	#[test]
	fn least_loaded_backend_wins() {
		let cache = cache(&["http://a", "http://b"]);
		record(&cache, "http://a", 2.0, true, Duration::ZERO);
		record(&cache, "http://b", 1.0, true, Duration::ZERO);
		for _ in 0..50 {
			let backend = choose_backend(&cache, WINDOW).unwrap();
			assert_eq!(backend.url, "http://b");
		}
	}

	#[test]
	fn tied_backends_split_roughly_evenly() {
		let cache = cache(&["http://a", "http://b"]);
		record(&cache, "http://a", 1.0, true, Duration::ZERO);
		record(&cache, "http://b", 1.0, true, Duration::ZERO);

		let mut hits: HashMap<String, u32> = HashMap::new();
		for _ in 0..1000 {
			let backend = choose_backend(&cache, WINDOW).unwrap();
			*hits.entry(backend.url).or_default() += 1;
		}
		let a = hits["http://a"];
		let b = hits["http://b"];
		assert_eq!(a + b, 1000);
		assert!((400..=600).contains(&a), "skewed split: a={a} b={b}");
	}

	#[test]
	fn missing_static_record_yields_none() {
		let urls = vec!["http://a".to_string()];
		let cache = MetricsCache::new(&urls);
		record(&cache, "http://a", 1.0, true, Duration::ZERO);
		assert!(choose_backend(&cache, WINDOW).is_none());
	}

	#[test]
	fn selected_backend_carries_its_kind() {
		let urls = vec!["http://a".to_string()];
		let cache = MetricsCache::new(&urls);
		cache.record_static(
			"http://a",
			StaticInfo {
				provider: BackendKind::Vllm,
				model_name: "m".to_string(),
			},
		);
		record(&cache, "http://a", 0.0, true, Duration::ZERO);
		let backend = choose_backend(&cache, WINDOW).unwrap();
		assert_eq!(backend.kind, BackendKind::Vllm);
	}
}
