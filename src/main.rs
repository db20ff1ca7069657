use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taste_ledger::{
    config::{Config, StoreBackend},
    db::{
        create_pool, create_redis_client, Cache, InMemoryLedgerStore, LedgerStore, PgLedgerStore,
        RedisSnapshotStore,
    },
    models::MediaKind,
    routes::{create_router, AppState},
    services::{
        providers::{
            ArrClient, Downloader, PlexClient, RecommendationSource, TmdbMatcher,
            TmdbRecommendations,
        },
        IngestSettings, KeyedLocks, LedgerReconciler, PerKind, RefreshOrchestrator,
        SuggestionIngest,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn LedgerStore> = match config.store_backend {
        StoreBackend::Postgres => Arc::new(PgLedgerStore::new(create_pool(&config.database_url).await?)),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ledger store; state is lost on restart");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client).await;

    let retry = config.retry_policy();
    let locks = KeyedLocks::new();
    let plex = Arc::new(PlexClient::new(config.plex_url.clone(), config.plex_token.clone()));
    let matcher = TmdbMatcher::new(
        cache.clone(),
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
    );

    let reconciler = LedgerReconciler::new(
        store.clone(),
        locks.clone(),
        retry,
        config.reconciler_settings(),
    );

    let refresh = RefreshOrchestrator::new(
        store.clone(),
        Arc::new(RedisSnapshotStore::new(cache.clone(), config.snapshot_ttl_secs)),
        plex.clone(),
        locks.clone(),
        retry,
        config.refresh_settings(),
    );

    let sources: PerKind<Arc<dyn RecommendationSource>> = PerKind {
        movie: Some(Arc::new(TmdbRecommendations::new(matcher.clone(), MediaKind::Movie))),
        show: Some(Arc::new(TmdbRecommendations::new(matcher.clone(), MediaKind::Show))),
    };

    let downloader = |kind: MediaKind| -> Option<Arc<dyn Downloader>> {
        let settings = config.downloader_for(kind)?;
        tracing::info!(kind = %kind, url = %settings.url, "Downloader enabled");
        Some(Arc::new(ArrClient::new(settings, kind)))
    };
    let downloaders = PerKind {
        movie: downloader(MediaKind::Movie),
        show: downloader(MediaKind::Show),
    };

    let ingest = SuggestionIngest::new(
        reconciler.clone(),
        store.clone(),
        Arc::new(matcher),
        plex,
        config.libraries(),
        retry,
        IngestSettings {
            lookup_chunk_size: config.lookup_chunk_size,
            auto_download: config.auto_download,
        },
    )
    .with_sources(sources)
    .with_downloaders(downloaders);

    let state = AppState {
        store,
        locks,
        reconciler,
        refresh: Arc::new(refresh),
        ingest: Arc::new(ingest),
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, backend = ?config.store_backend, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache_writer.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
