//! Background job: purge token records unused for longer than the expiration window.
//!
//! Fires once per window, the first time one full window after start. A failed
//! sweep is logged and retried on the next tick; it never stops the loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::store::TokenStore;

pub struct ExpirySweeper {
    store: Arc<dyn TokenStore>,
    window: chrono::Duration,
    period: std::time::Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn TokenStore>, window: chrono::Duration) -> anyhow::Result<Self> {
        let period = window
            .to_std()
            .ok()
            .filter(|p| !p.is_zero())
            .ok_or_else(|| anyhow::anyhow!("expiration window must be positive"))?;
        Ok(Self {
            store,
            window,
            period,
        })
    }

    /// Starts the sweep loop. It runs until [`SweeperHandle::shutdown`] is
    /// called or the handle is dropped.
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        tracing::debug!("expiry sweeper stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = sweep_once(self.store.as_ref(), self.window).await {
                            tracing::error!("expiry sweep failed: {:#}", e);
                        }
                    }
                }
            }
        });

        SweeperHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the loop and waits for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("expiry sweeper task ended abnormally: {}", e);
        }
    }
}

/// Deletes every record whose `last_used` is older than `window`. Returns the count removed.
pub async fn sweep_once(store: &dyn TokenStore, window: chrono::Duration) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - window;
    let removed = store.delete_older_than(cutoff).await?;

    if removed > 0 {
        tracing::info!(removed, %cutoff, "swept expired session tokens");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::Token;
    use crate::store::memory::MemoryTokenStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn token(value: &str, last_used: DateTime<Utc>) -> Token {
        Token {
            value: value.into(),
            associated_identity: format!("identity-{}", value),
            created: last_used,
            last_used,
            times_used: 0,
            max_usage: 10,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_records_outside_window() {
        let store = MemoryTokenStore::new();
        let window = Duration::minutes(10);
        let now = Utc::now();
        store.insert(&token("old", now - window * 2)).await.unwrap();
        store.insert(&token("young", now - window / 2)).await.unwrap();

        let removed = sweep_once(&store, window).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("young").is_some());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_purges_and_stops() {
        let store = MemoryTokenStore::new();
        store
            .insert(&token("old", Utc::now() - Duration::hours(1)))
            .await
            .unwrap();

        let handle = ExpirySweeper::new(Arc::new(store.clone()), Duration::milliseconds(50))
            .unwrap()
            .spawn();
        for _ in 0..50 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(store.is_empty());
        handle.shutdown().await;
    }

    struct FailingStore {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl TokenStore for FailingStore {
        async fn find_by_identity(&self, _: &str) -> anyhow::Result<Option<Token>> {
            Ok(None)
        }
        async fn find_by_identity_and_value(&self, _: &str, _: &str) -> anyhow::Result<Option<Token>> {
            Ok(None)
        }
        async fn insert(&self, _: &Token) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _: &Token) -> anyhow::Result<()> {
            Ok(())
        }
        async fn increment_usage(&self, _: &str, _: DateTime<Utc>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_older_than(&self, _: DateTime<Utc>) -> anyhow::Result<u64> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("store unavailable")
        }
    }

    #[tokio::test]
    async fn test_failed_sweep_is_retried_next_tick() {
        let store = Arc::new(FailingStore {
            sweeps: AtomicUsize::new(0),
        });
        let handle = ExpirySweeper::new(store.clone(), Duration::milliseconds(20))
            .unwrap()
            .spawn();
        for _ in 0..100 {
            if store.sweeps.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(store.sweeps.load(Ordering::SeqCst) >= 3);
        handle.shutdown().await;
    }

    #[test]
    fn test_non_positive_window_rejected() {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        assert!(ExpirySweeper::new(store.clone(), Duration::zero()).is_err());
        assert!(ExpirySweeper::new(store, Duration::minutes(-1)).is_err());
    }
}
