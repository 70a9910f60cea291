use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use slotbook::compactor;
use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    slotbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let engine = Arc::new(Engine::new(wal_path.clone(), Arc::new(NotifyHub::new()))?);

    info!("slotbook engine ready");
    info!("  wal: {}", wal_path.display());
    info!("  providers: {}", engine.list_providers().await.len());
    info!("  requesters: {}", engine.list_requesters().await.len());
    info!("  slots: {} ({} available)", engine.list_slots().await.len(), engine.list_available_slots().await.len());
    info!("  compact: every {:?} past {} appends", config.compact_interval, config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let compactor_task = tokio::spawn(compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    compactor_task.abort();
    engine.compact_wal().await?;
    info!("slotbook stopped");
    Ok(())
}
