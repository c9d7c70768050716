//! monitorx_agent: serves live host metrics over HTTP and WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitorx_agent::config::AgentConfig;
use monitorx_agent::http::build_router;
use monitorx_agent::scheduler::Scheduler;
use monitorx_agent::source::SysinfoSource;
use monitorx_agent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match AgentConfig::from_env_and_args() {
        Ok(c) => c,
        Err(usage) => {
            println!("{usage}");
            return Ok(());
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monitorx_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());
    let source = Arc::new(SysinfoSource::new());
    let state = AppState::new(source, host, &cfg);

    let scheduler = Scheduler::new(
        Arc::clone(&state.sampler),
        Arc::clone(&state.history),
        Arc::clone(&state.hub),
        cfg.sample_interval,
    )
    .start();

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "monitorx_agent v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr().unwrap_or(addr)
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
            info!("received Ctrl+C, shutting down");
        })
        .await?;

    scheduler.stop();
    scheduler.join().await;
    Ok(())
}
