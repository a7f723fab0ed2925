use anyhow::Result;
use tracing::{debug, error, info, trace};

use crate::config::{AppConfig, open_store};

/// Applies migrations to the application and accounting databases.
pub async fn init_database(config: &AppConfig) -> Result<()> {
    trace!("Entering init_database function");
    info!("Initializing databases");

    for (name, url) in [
        ("primary", config.primary_database_url.as_str()),
        ("accounting", config.secondary_database_url.as_str()),
    ] {
        match open_store(name, url, true).await {
            Ok(store) => {
                debug!("{} database ready", name);
                if let Err(e) = store.ping().await {
                    error!("{} database is not answering after migration: {}", name, e);
                    return Err(e.into());
                }
            }
            Err(e) => {
                error!("Failed to initialize the {} database: {:#}", name, e);
                return Err(e);
            }
        }
    }

    info!("Database initialization completed successfully!");
    Ok(())
}
