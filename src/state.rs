use std::time::Duration;

use anyhow::Context;

use crate::cache::MetricsCache;
use crate::config::Config;

/// Default timeout for control-plane traffic (discovery and probes);
/// individual probes may tighten it per request. Forwarded requests
/// override it with the configured backend timeout.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide state threaded through the HTTP surface and the
/// refresher. Holds the one pooled outbound client and the backend
/// cache; dropping the state at shutdown closes the client.
pub struct ProxyState {
	pub config: Config,
	pub client: reqwest::Client,
	pub cache: MetricsCache,
}

impl ProxyState {
	pub fn new(config: Config) -> anyhow::Result<ProxyState> {
		let client = reqwest::Client::builder()
			.timeout(CONTROL_TIMEOUT)
			.build()
			.context("failed to build outbound HTTP client")?;
		let cache = MetricsCache::new(&config.backends);
		Ok(ProxyState {
			config,
			client,
			cache,
		})
	}
}
