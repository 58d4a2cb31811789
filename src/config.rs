use serde::Deserialize;

use crate::adapters::inbound::DEFAULT_MAX_UPLOAD_BYTES;
use crate::adapters::outbound::{BAIDU_DEFAULT_URL, NOMINATIM_DEFAULT_URL};
use crate::application::geocode_dispatcher::DEFAULT_GEOCODE_WORKERS;

/// Which store backs the repositories.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    Memory,
}

impl StorageKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "memory" | "mem" | "dashmap" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // HTTP API
    pub listen_addr: String,
    pub max_upload_bytes: usize,

    // Storage
    pub storage: StorageKind,
    pub db_path: String,

    // Geocoding providers, in chain order
    pub providers: Vec<String>,
    pub nominatim_url: String,
    pub baidu_url: String,
    pub baidu_api_key: Option<String>,
    pub http_timeout_secs: u64,
    pub user_agent: String,

    // Background geocoding
    pub batch_delay_ms: u64,
    pub geocode_workers: usize,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            storage: StorageKind::Sqlite,
            db_path: "merchants.db".to_string(),
            providers: vec!["nominatim".to_string(), "baidu".to_string()],
            nominatim_url: NOMINATIM_DEFAULT_URL.to_string(),
            baidu_url: BAIDU_DEFAULT_URL.to_string(),
            baidu_api_key: None,
            http_timeout_secs: 30,
            user_agent: concat!("merchant-geo/", env!("CARGO_PKG_VERSION")).to_string(),
            batch_delay_ms: 100,
            geocode_workers: DEFAULT_GEOCODE_WORKERS,
            debug: false,
        }
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the config from `lookup`; unset or unparsable values fall back to
/// the defaults.
pub fn load_config_from<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let listen_addr = lookup("MERCHANT_GEO_LISTEN_ADDR").unwrap_or(defaults.listen_addr);

    let max_upload_bytes = lookup("MERCHANT_GEO_MAX_UPLOAD_BYTES")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.max_upload_bytes);

    let storage = match lookup("MERCHANT_GEO_STORAGE") {
        Some(v) => StorageKind::parse(&v)
            .ok_or_else(|| anyhow::anyhow!("unknown storage backend: {}", v))?,
        None => defaults.storage,
    };

    let db_path = lookup("MERCHANT_GEO_DB_PATH").unwrap_or(defaults.db_path);

    let providers = lookup("MERCHANT_GEO_PROVIDERS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or(defaults.providers);

    let nominatim_url = lookup("MERCHANT_GEO_NOMINATIM_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or(defaults.nominatim_url);

    let baidu_url = lookup("MERCHANT_GEO_BAIDU_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or(defaults.baidu_url);

    let baidu_api_key = lookup("MERCHANT_GEO_BAIDU_API_KEY").filter(|v| !v.trim().is_empty());

    let http_timeout_secs = lookup("MERCHANT_GEO_HTTP_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.http_timeout_secs);

    let user_agent = lookup("MERCHANT_GEO_USER_AGENT").unwrap_or(defaults.user_agent);

    let batch_delay_ms = lookup("MERCHANT_GEO_BATCH_DELAY_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.batch_delay_ms);

    let geocode_workers = lookup("MERCHANT_GEO_GEOCODE_WORKERS")
        .and_then(|v| v.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or(defaults.geocode_workers);

    let debug = lookup("DEBUG").is_some();

    Ok(Config {
        listen_addr,
        max_upload_bytes,
        storage,
        db_path,
        providers,
        nominatim_url,
        baidu_url,
        baidu_api_key,
        http_timeout_secs,
        user_agent,
        batch_delay_ms,
        geocode_workers,
        debug,
    })
}
