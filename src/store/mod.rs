pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::models::token::Token;

/// Persistence of token records. Every operation is atomic for a single
/// record; nothing here spans records.
///
/// `stored_value` arguments are always the codec-encoded form.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_by_identity(&self, identity: &str) -> anyhow::Result<Option<Token>>;

    async fn find_by_identity_and_value(
        &self,
        identity: &str,
        stored_value: &str,
    ) -> anyhow::Result<Option<Token>>;

    async fn insert(&self, token: &Token) -> anyhow::Result<()>;

    async fn delete(&self, token: &Token) -> anyhow::Result<()>;

    /// `times_used += 1` and `last_used = now`. A missing record is not an error.
    async fn increment_usage(&self, stored_value: &str, now: DateTime<Utc>) -> anyhow::Result<()>;

    /// Deletes every record whose `last_used` is before `cutoff`. Returns the count removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Releases connections. The store must not be used afterwards.
    async fn close(&self) {}
}

/// Opens the configured store, or an in-memory one when none is configured.
pub async fn connect(config: Option<&StoreConfig>) -> anyhow::Result<Arc<dyn TokenStore>> {
    match config {
        Some(cfg) => {
            tracing::info!(server = %cfg.server, database = %cfg.database, "Connecting to token store...");
            let store = postgres::PgTokenStore::connect(cfg).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No store configured; tokens are kept in memory and lost on restart");
            Ok(Arc::new(memory::MemoryTokenStore::new()))
        }
    }
}
