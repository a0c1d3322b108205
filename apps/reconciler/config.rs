use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{env, fs, path::PathBuf};
use tracing::{info, warn};
use utils::errors::CONFIG_ALREADY_INITIALIZED;

use crate::models::PluginType;
use crate::persistence::DEFAULT_STORAGE_KEY;
use crate::source::DEFAULT_PAGE_SIZE;

pub static CONFIG: OnceCell<ReconcilerConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub indexer: IndexerConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub endpoint: String,
    pub page_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/subgraphs/name/osx".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub storage_key: String,
    /// Whether the user accepted functional storage; gates the on-disk mirror.
    pub functional_consent: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("pending-cache"),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            functional_consent: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WatchedDao {
    pub address: String,
    pub plugin: PluginType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub daos: Vec<WatchedDao>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            daos: Vec::new(),
        }
    }
}

pub fn load() -> Result<&'static ReconcilerConfig> {
    let config = load_config();
    CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!(CONFIG_ALREADY_INITIALIZED))?;
    CONFIG
        .get()
        .ok_or_else(|| anyhow::anyhow!("Reconciler config not initialized"))
}

pub fn load_config() -> ReconcilerConfig {
    let path =
        env::var("RECONCILER_CONFIG_PATH").unwrap_or_else(|_| "reconciler.yaml".to_string());
    let mut config = match fs::read_to_string(&path) {
        Ok(contents) => match serde_yaml::from_str::<ReconcilerConfig>(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, path = %path, "Failed to parse reconciler config, using defaults");
                ReconcilerConfig::default()
            }
        },
        Err(err) => {
            warn!(error = %err, path = %path, "Reconciler config not found, using defaults");
            ReconcilerConfig::default()
        }
    };

    apply_env_overrides(&mut config);

    info!(
        endpoint = %config.indexer.endpoint,
        cache_dir = %config.cache.dir.display(),
        functional_consent = config.cache.functional_consent,
        watched_daos = config.refresh.daos.len(),
        "Reconciler config loaded"
    );

    config
}

fn apply_env_overrides(config: &mut ReconcilerConfig) {
    if let Ok(value) = env::var("INDEXER_ENDPOINT") {
        config.indexer.endpoint = value;
    }

    if let Ok(value) = env::var("PENDING_CACHE_DIR") {
        config.cache.dir = PathBuf::from(value);
    }

    if let Ok(value) = env::var("FUNCTIONAL_COOKIES_ACCEPTED") {
        match value.parse::<bool>() {
            Ok(accepted) => config.cache.functional_consent = accepted,
            Err(err) => {
                warn!(error = %err, "Failed to parse FUNCTIONAL_COOKIES_ACCEPTED override");
            }
        }
    }

    if let Ok(value) = env::var("RECONCILER_BIND_ADDRESS") {
        config.server.bind_address = value;
    }

    if let Ok(value) = env::var("RECONCILER_WATCHED_DAOS") {
        match serde_json::from_str::<Vec<WatchedDao>>(&value) {
            Ok(daos) => config.refresh.daos = daos,
            Err(err) => {
                warn!(error = %err, "Failed to parse RECONCILER_WATCHED_DAOS override");
            }
        }
    }

    if let Ok(value) = env::var("RECONCILER_REFRESH_SECS") {
        match value.parse::<u64>() {
            Ok(secs) if secs > 0 => config.refresh.interval_secs = secs,
            Ok(_) => warn!("RECONCILER_REFRESH_SECS must be positive, keeping default"),
            Err(err) => {
                warn!(error = %err, "Failed to parse RECONCILER_REFRESH_SECS override");
            }
        }
    }
}
