#![warn(unused_extern_crates)]
use anyhow::{Context, Result};
use dotenv::dotenv;
use reconciler::{
    PendingCache, ProposalsPipeline,
    augment::VoteOptionTable,
    config::{self, WatchedDao},
    persistence::{CacheMirror, ConsentFlag, FileStore},
    server,
    source::SubgraphApi,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use utils::{
    errors::{
        BIND_FAILED, CACHE_DIR_CREATE_FAILED, CACHE_RESTORE_FAILED, INDEXER_ENDPOINT_NOT_SET,
        SERVER_FAILED,
    },
    tracing::run_with_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    run_with_tracing(|| async move { run().await }).await
}

async fn run() -> Result<()> {
    info!("Reconciler service starting up");
    let config = config::load()?;

    if config.indexer.endpoint.trim().is_empty() {
        anyhow::bail!(INDEXER_ENDPOINT_NOT_SET);
    }

    let store = FileStore::new(&config.cache.dir).context(CACHE_DIR_CREATE_FAILED)?;
    let consent = ConsentFlag::new(config.cache.functional_consent);
    let mirror = CacheMirror::with_key(
        Arc::new(store),
        Arc::new(consent),
        config.cache.storage_key.clone(),
    );
    let cache = PendingCache::restore(mirror).context(CACHE_RESTORE_FAILED)?;

    let source = Arc::new(SubgraphApi::new_with_endpoint(
        config.indexer.endpoint.clone(),
    ));
    let pipeline = ProposalsPipeline::with_options(
        source,
        cache,
        VoteOptionTable::sdk_default(),
        config.indexer.page_size,
    );

    let mut handles = Vec::new();
    let interval = Duration::from_secs(config.refresh.interval_secs.max(1));
    for watched in &config.refresh.daos {
        handles.push(spawn_refresh(pipeline.clone(), watched.clone(), interval));
    }
    if handles.is_empty() {
        warn!("No DAOs configured for background refresh");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .context(BIND_FAILED)?;
    let addr = listener.local_addr().context(BIND_FAILED)?;
    let app = server::router(pipeline.clone());

    let server_handle = tokio::spawn(async move {
        info!(address = %addr, "Starting HTTP server");
        axum::serve(listener, app).await.context(SERVER_FAILED)
    });

    info!(refresh_tasks = handles.len(), "All tasks started");

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Ok(())) => warn!("HTTP server stopped"),
                Ok(Err(e)) => error!(error = ?e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    for handle in handles {
        handle.abort();
    }
    pipeline.cache().flush().await;

    Ok(())
}

fn spawn_refresh(
    pipeline: ProposalsPipeline,
    watched: WatchedDao,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match pipeline.reconcile(&watched.address, watched.plugin).await {
                Ok(view) => {
                    info!(
                        dao = %watched.address,
                        plugin = %watched.plugin,
                        proposals = view.data.len(),
                        "Refreshed proposals"
                    );
                }
                Err(e) => {
                    error!(
                        dao = %watched.address,
                        plugin = %watched.plugin,
                        error = %e,
                        "Failed to refresh proposals"
                    );
                }
            }
        }
    })
}
