use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use orderstream_api::app::{AppServices, build_app};
use orderstream_api::consumer::Consumers;
use orderstream_infra::PipelineConfig;

const SUPERVISE_EVERY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;
    orderstream_observability::init_with(config.log_format);

    let broker = orderstream_infra::broker::connect(&config).context("connecting to broker")?;
    let consumers = Arc::new(
        Consumers::start(Arc::clone(&broker), &config).context("starting consumers")?,
    );
    let services = Arc::new(AppServices::new(broker, config.topic.clone()));
    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&consumers)))
        .await
        .context("http server")?;

    let consumers = Arc::into_inner(consumers).context("consumers still shared after server exit")?;
    let stopped_early = consumers.any_finished();

    tracing::info!("shutting down consumers");
    let exits = tokio::task::spawn_blocking(move || consumers.shutdown()).await?;
    let failed = exits.iter().filter(|e| e.is_failure()).count();
    tracing::info!(units = exits.len(), failed, "shutdown complete");

    if stopped_early {
        anyhow::bail!("a consumer unit stopped unexpectedly ({failed} failed)");
    }
    Ok(())
}

/// Ctrl-c, or any consumer unit stopping on its own.
async fn shutdown_signal(consumers: Arc<Consumers>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl-c received"),
        _ = consumers.unit_stopped(SUPERVISE_EVERY) => {}
    }
}
