use anyhow::{Context, Result};
use cost_service::{
    api,
    config::{AppConfig, StoreConfig, StoreKind},
    feeds::{FeedHub, ValueFeed},
    metrics_server, observability,
    schedule::zone_label,
    sensor::{plan_sensors, start_sensors, CostContext},
    sinks::{JsonFileStore, MemoryStore, PgSnapshotStore, SnapshotStore},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};

async fn build_store(cfg: &StoreConfig) -> Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = match cfg.kind {
        StoreKind::File => Arc::new(JsonFileStore::new(&cfg.dir)),
        StoreKind::Memory => {
            tracing::warn!(
                "memory snapshot store configured, sensor state will not survive a restart"
            );
            Arc::new(MemoryStore::new())
        }
        StoreKind::Pgwire => {
            let uri = cfg
                .uri
                .as_deref()
                .context("store.uri is required for the pgwire store")?;
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect(uri)
                .await?;
            let backoff = Duration::from_millis(cfg.retry_backoff_ms);
            Arc::new(PgSnapshotStore::connect(pool, cfg.max_retries, backoff).await?)
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let zone = cfg.time_zone()?;
    let store = build_store(&cfg.store).await?;
    let hub = Arc::new(FeedHub::new(cfg.http.channel_capacity));
    let feeds: Arc<dyn ValueFeed> = hub.clone();
    let ctx = CostContext::new(feeds, store, zone);

    let plans = plan_sensors(&cfg.sensors)?;
    let handles = start_sensors(&ctx, &plans).await?;
    tracing::info!(
        sensors = ctx.board.keys().len(),
        zone = zone_label(&ctx.zone),
        "cost sensors started"
    );

    let addr: SocketAddr = cfg
        .http
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr: {e}"))?;
    let app = api::router(hub, ctx.board.clone(), cfg.http.auth_bearer_token.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP listener started");

    let shutdown = ctx.cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown requested");
        shutdown.cancel();
    });

    let serve_cancel = ctx.cancel.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await?;

    ctx.shutdown();
    futures::future::join_all(handles).await;
    tracing::info!("cost sensors stopped");

    Ok(())
}
