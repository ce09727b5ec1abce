use std::process;
use std::sync::Arc;

use anyhow::Context;
use llm_proxy::config::Config;
use llm_proxy::refresh;
use llm_proxy::server::App;
use llm_proxy::state::ProxyState;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let config = match Config::from_env() {
		Ok(config) => config,
		Err(e) => {
			eprintln!("config error: {e}, exiting");
			process::exit(1);
		},
	};

	let state = Arc::new(ProxyState::new(config)?);
	let shutdown = CancellationToken::new();
	let refresher = tokio::spawn(refresh::run(state.clone(), shutdown.clone()));

	let listener = tokio::net::TcpListener::bind(state.config.proxy_addr)
		.await
		.with_context(|| format!("failed to bind {}", state.config.proxy_addr))?;
	info!(
		addr = %state.config.proxy_addr,
		backends = state.config.backends.len(),
		"proxy listening"
	);

	let app = App::new(state.clone());
	axum::serve(listener, app.router())
		.with_graceful_shutdown({
			let shutdown = shutdown.clone();
			async move {
				let _ = tokio::signal::ctrl_c().await;
				shutdown.cancel();
			}
		})
		.await?;

	// The refresher is cancelled and drained before the process exits so
	// no probe is cut off mid-write.
	shutdown.cancel();
	refresher.await?;
	Ok(())
}
