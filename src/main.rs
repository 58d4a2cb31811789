//! merchant-geo - Merchant directory with multi-provider geocoding
//!
//! This is the composition root that wires together all the components.

use merchant_geo::adapters::inbound::{ApiServer, ApiState};
use merchant_geo::adapters::outbound::{
    BaiduConfig, BaiduProvider, BroadcastEventPublisher, DashMapStore, NominatimConfig,
    NominatimProvider, SqliteStore,
};
use merchant_geo::{
    load_config, Config, EventPublisher, GeoPointService, GeocodeDispatcher, GeocodeProvider,
    GeocodeService, MerchantCsvImporter, MerchantService, MerchantTagService, Repositories,
    StorageKind,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

/// How long shutdown waits for queued background geocoding.
const GEOCODE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting merchant-geo listen={} storage={:?}",
        cfg.listen_addr,
        cfg.storage
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let repos = match cfg.storage {
        StorageKind::Sqlite => Repositories::from_store(Arc::new(SqliteStore::open(&cfg.db_path)?)),
        StorageKind::Memory => {
            tracing::warn!("in-memory storage: data is lost on exit");
            Repositories::from_store(Arc::new(DashMapStore::new()))
        }
    };

    let providers = build_providers(&cfg);
    if providers.is_empty() {
        tracing::warn!("no geocoding providers configured, geocoding requests will fail");
    }

    let events: Arc<dyn EventPublisher> = Arc::new(BroadcastEventPublisher::default());

    // 2. Application services
    let geocoder = Arc::new(
        GeocodeService::new(providers, repos.geo_points.clone())
            .with_batch_delay(Duration::from_millis(cfg.batch_delay_ms)),
    );
    tracing::info!("geocoding chain: {:?}", geocoder.provider_names());

    let dispatcher = GeocodeDispatcher::new(geocoder.clone(), cfg.geocode_workers);

    let merchants = Arc::new(
        MerchantService::new(repos.clone(), events.clone()).with_geocoder(geocoder.clone()),
    );
    let importer = Arc::new(
        MerchantCsvImporter::new(merchants.clone(), repos.tags.clone())
            .with_dispatcher(dispatcher.clone()),
    );

    let state = ApiState {
        merchants,
        tags: Arc::new(MerchantTagService::new(repos.tags.clone(), events.clone())),
        geo_points: Arc::new(GeoPointService::new(
            repos.merchants.clone(),
            repos.geo_points.clone(),
            events,
        )),
        geocoder,
        importer,
    };

    // 3. Inbound adapter
    ApiServer::new(cfg.listen_addr.clone(), state)
        .with_max_upload_bytes(cfg.max_upload_bytes)
        .run(shutdown_signal())
        .await?;

    // 4. Drain background geocoding
    let pending = dispatcher.pending();
    if pending > 0 {
        tracing::info!("waiting for {} background geocoding jobs", pending);
        if tokio::time::timeout(GEOCODE_DRAIN_TIMEOUT, dispatcher.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                "drain timeout: {} geocoding jobs abandoned",
                dispatcher.pending()
            );
        }
    }

    tracing::info!("merchant-geo stopped");
    Ok(())
}

/// Providers in configured order. Baidu is only registered with an API key.
fn build_providers(cfg: &Config) -> Vec<Arc<dyn GeocodeProvider>> {
    let timeout = Duration::from_secs(cfg.http_timeout_secs);
    let mut providers: Vec<Arc<dyn GeocodeProvider>> = Vec::new();

    for name in &cfg.providers {
        match name.as_str() {
            "nominatim" => providers.push(Arc::new(NominatimProvider::new(NominatimConfig {
                base_url: cfg.nominatim_url.clone(),
                user_agent: cfg.user_agent.clone(),
                timeout,
            }))),
            "baidu" => match &cfg.baidu_api_key {
                Some(key) => providers.push(Arc::new(BaiduProvider::new(BaiduConfig {
                    api_key: key.clone(),
                    base_url: cfg.baidu_url.clone(),
                    timeout,
                }))),
                None => tracing::info!("baidu provider skipped: no API key"),
            },
            other => tracing::warn!("unknown geocoding provider '{}' ignored", other),
        }
    }

    providers
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }
}
