use anyhow::Context;

use stockhold_core::SystemClock;
use stockhold_infra::{EngineConfig, InMemoryEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockhold_observability::init();

    let config = EngineConfig::from_env();
    let engine = InMemoryEngine::in_memory(config, SystemClock).context("invalid STOCKHOLD_* configuration")?;
    tracing::info!(config = ?engine.config(), "stockhold engine ready");

    let runner = engine
        .spawn_maintenance()
        .context("failed to start the maintenance runner")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    // Joining the runner thread blocks until the in-flight tick finishes.
    let stats = tokio::task::spawn_blocking(move || {
        let stats = runner.stats();
        runner.shutdown();
        stats
    })
    .await
    .context("maintenance runner shutdown failed")?;

    tracing::info!(
        ticks = stats.ticks_run,
        failed_ticks = stats.ticks_with_failures,
        expired = stats.orders_expired,
        escalated = stats.orders_escalated,
        "stockhold stopped"
    );
    Ok(())
}
