pub mod chat;
pub mod check;
pub mod init;
pub mod knowledge;
pub mod serve;

use dentcoach_config::AppConfig;
use dentcoach_core::knowledge::KnowledgeStore;
use dentcoach_knowledge::Stores;
use std::sync::Arc;

/// Load config, reporting failures in CLI terms.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the configured store backend.
pub async fn open_stores(config: &AppConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    let stores = dentcoach_knowledge::open_store(
        &config.knowledge.backend,
        &config.knowledge.database_path(),
    )
    .await
    .map_err(|e| format!("Failed to open knowledge store: {e}"))?;
    Ok(stores)
}

/// Open the configured knowledge store.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn KnowledgeStore>, Box<dyn std::error::Error>> {
    Ok(open_stores(config).await?.knowledge)
}
