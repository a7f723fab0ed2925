use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use compute::SyncPolicy;
use config::{Config, Environment, File};
use migration::{Migrator, MigratorTrait};
use model::store::{LedgerStore, MemoryStore, SqlStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::schemas::AppState;

/// Prefix of URLs that select the in-process store.
pub const MEMORY_URL_PREFIX: &str = "memory://";

/// Retry and sweep settings of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub commit_retries: u32,
    /// Seconds between stale sweeps; 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl SyncSettings {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            commit_retries: self.commit_retries,
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

/// Service configuration, assembled once at startup and passed down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application (source of truth) database.
    pub primary_database_url: String,
    /// Accounting database that mirrors account balances.
    pub secondary_database_url: String,
    pub bind_address: String,
    pub sync: SyncSettings,
    pub cache: CacheSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let policy = SyncPolicy::default();
        Self {
            primary_database_url: "sqlite://feesync.db?mode=rwc".to_string(),
            secondary_database_url: "sqlite://feesync-accounting.db?mode=rwc".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            sync: SyncSettings {
                max_attempts: policy.max_attempts,
                initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
                max_backoff_ms: policy.max_backoff.as_millis() as u64,
                commit_retries: policy.commit_retries,
                sweep_interval_secs: 30,
            },
            cache: CacheSettings {
                max_capacity: 1000,
                ttl_secs: 300,
            },
        }
    }
}

impl AppConfig {
    /// Defaults, then `file` if present, then `FEESYNC__*` variables
    /// (`FEESYNC__SYNC__MAX_ATTEMPTS=3` sets `sync.max_attempts`).
    pub fn load_from(file: &Path) -> Result<Self> {
        trace!(file = %file.display(), "loading configuration");
        let settings = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix("FEESYNC")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("failed to assemble configuration")?;
        let config: AppConfig = settings
            .try_deserialize()
            .context("invalid configuration")?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Applies values given on the command line.
    pub fn with_overrides(
        mut self,
        primary_database_url: Option<String>,
        secondary_database_url: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        if let Some(url) = primary_database_url {
            self.primary_database_url = url;
        }
        if let Some(url) = secondary_database_url {
            self.secondary_database_url = url;
        }
        if let Some(address) = bind_address {
            self.bind_address = address;
        }
        self
    }
}

/// Opens a store, running migrations first when `migrate` is set.
pub async fn open_store(name: &str, url: &str, migrate: bool) -> Result<Arc<dyn LedgerStore>> {
    if url.starts_with(MEMORY_URL_PREFIX) {
        info!(store = name, "using in-memory store");
        return Ok(Arc::new(MemoryStore::new(name)));
    }

    info!(store = name, "connecting to database");
    let store = SqlStore::connect(name, url)
        .await
        .with_context(|| format!("failed to connect to the {name} database"))?;
    if migrate {
        Migrator::up(store.connection(), None)
            .await
            .with_context(|| format!("failed to migrate the {name} database"))?;
        debug!(store = name, "migrations applied");
    }
    Ok(Arc::new(store))
}

/// Opens both stores and builds the shared application state.
pub async fn initialize_app_state(config: &AppConfig, migrate: bool) -> Result<AppState> {
    let primary = open_store("primary", &config.primary_database_url, migrate).await?;
    let secondary = open_store("accounting", &config.secondary_database_url, migrate).await?;
    let state = AppState::new(primary, secondary, config.sync.policy(), &config.cache).await?;
    Ok(state)
}
