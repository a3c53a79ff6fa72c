use std::sync::Arc;

use tracing::info;

use rentline::clock::{Clock, SystemClock};
use rentline::config::Config;
use rentline::engine::Engine;
use rentline::notify::NotifyHub;
use rentline::reaper;
use rentline::store::{CachedItemStore, InMemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    rentline::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(InMemoryStore::open(&config.wal_path())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache_ttl = chrono::Duration::from_std(config.item_cache_ttl)?;
    let items = Arc::new(CachedItemStore::new(store.clone(), cache_ttl, clock.clone()));
    let engine = Arc::new(Engine::new(
        store.clone(),
        items,
        clock,
        Arc::new(NotifyHub::new()),
        config.engine(),
    ));

    info!("rentline sweeper started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  hold ttl: {} min", config.hold_ttl_minutes);
    info!("  reaper interval: {:?}", config.reaper_interval);
    info!("  bookings: {}, items: {}", store.booking_count(), store.item_count());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let reaper_task = tokio::spawn(reaper::run_reaper(engine, config.reaper_interval));
    let compactor_task = tokio::spawn(reaper::run_compactor(
        store.clone(),
        config.reaper_interval,
        config.compact_threshold,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    reaper_task.abort();
    compactor_task.abort();

    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("rentline stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
