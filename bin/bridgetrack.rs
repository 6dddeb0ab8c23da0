use std::{sync::Arc, time::Duration};

use anyhow::Context;
use futures::future::select_all;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio::task::JoinHandle;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use bridgetrack::{
    chain::{protocol_for, ChainClient, RpcChainClient},
    error::QueryError,
    query::snapshot_at,
    worker::{CoinGeckoSource, PriceCache},
    BlockSyncEngine, NetworkBarrier, PostgresClient, PriceOracle, Settings, SnapshotAggregator,
    SnapshotStore,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to install logger")?;

    let settings = Settings::new()
        .context("Failed to load config.yaml. Please ensure it exists and is valid")?;

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    postgres.migrate().await?;
    let store: Arc<dyn SnapshotStore> = Arc::new(postgres);

    match snapshot_at(store.as_ref(), None).await {
        Ok(snapshot) => info!(
            "Resuming after bucket {} ({} locked entries)",
            snapshot.timestamp,
            snapshot.locked.len()
        ),
        Err(QueryError::NotFound(_)) => info!("No snapshot recorded yet"),
        Err(e) => return Err(e).context("Failed to read latest snapshot"),
    }

    let source = CoinGeckoSource::new(
        settings.prices.provider_url.clone(),
        Duration::from_secs(settings.prices.request_timeout_secs),
    )?;
    let cache = PriceCache::new(Duration::from_secs(settings.prices.cache_ttl_secs));
    let oracle = Arc::new(PriceOracle::new(Arc::new(source), cache, &settings.prices));

    let barrier = Arc::new(NetworkBarrier::new(
        settings.streams.iter().map(|s| s.name.clone()),
    ));

    let mut handles: Vec<JoinHandle<anyhow::Result<()>>> = Vec::with_capacity(settings.streams.len());
    for stream in &settings.streams {
        let client: Arc<dyn ChainClient> = Arc::new(
            RpcChainClient::new(
                stream.rpc_url.clone(),
                Duration::from_secs(settings.tracker.rpc_timeout_secs),
            )
            .with_context(|| format!("Failed to create RPC client for {}", stream.name))?,
        );
        let protocol = protocol_for(stream.protocol);
        let aggregator = SnapshotAggregator::new(stream.name.clone(), protocol.clone(), oracle.clone());
        let engine = BlockSyncEngine::new(
            stream.name.clone(),
            client,
            protocol,
            store.clone(),
            barrier.clone(),
            aggregator,
            settings.tracker.clone(),
        );

        info!("[{}] Spawning {} stream for {}", stream.name, stream.protocol, stream.rpc_url);
        handles.push(tokio::spawn(async move { engine.run().await }));
    }

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Tracker running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    let terminate = sigterm_stream.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, exiting gracefully...");
        },
        (result, _, _) = select_all(handles) => {
            let error = match result {
                Ok(Ok(())) => anyhow::anyhow!("stream stopped unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::Error::new(e).context("stream task panicked"),
            };
            error!("Stopping tracker: {:#}", error);
            return Err(error);
        },
    }

    Ok(())
}
