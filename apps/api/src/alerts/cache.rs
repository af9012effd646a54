//! Time-bounded cache of the active rule set.
//!
//! Readers get an `Arc<RuleSet>` and evaluate against it for as long as they
//! like. A refresh builds a new set and swaps the pointer; sets already handed
//! out are never modified.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::alerts::evaluator::RuleSet;
use crate::errors::AppError;
use crate::store::RuleSource;

struct Cached {
    rules: Arc<RuleSet>,
    loaded_at: Option<Instant>,
}

pub struct RuleCache {
    source: Arc<dyn RuleSource>,
    ttl: Duration,
    current: RwLock<Cached>,
}

impl RuleCache {
    pub fn new(source: Arc<dyn RuleSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(Cached {
                rules: Arc::new(RuleSet::default()),
                loaded_at: None,
            }),
        }
    }

    /// The current rule set, reloaded first if it is older than the TTL.
    /// A failed reload falls back to the previous set when there is one.
    pub async fn snapshot(&self) -> Result<Arc<RuleSet>, AppError> {
        {
            let cached = self.current.read().await;
            if let Some(loaded_at) = cached.loaded_at {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(cached.rules.clone());
                }
            }
        }

        match self.refresh().await {
            Ok(rules) => Ok(rules),
            Err(e) => {
                let cached = self.current.read().await;
                if cached.loaded_at.is_some() {
                    warn!("Rule reload failed, keeping previous rule set: {e}");
                    Ok(cached.rules.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Reloads from the source and swaps the cached set.
    pub async fn refresh(&self) -> Result<Arc<RuleSet>, AppError> {
        let rules = Arc::new(RuleSet::new(self.source.load_active_rules().await?));
        let mut cached = self.current.write().await;
        cached.rules = rules.clone();
        cached.loaded_at = Some(Instant::now());
        info!("Loaded {} active alert rules", rules.len());
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::models::alert::{AlertRule, ChangeKind, Direction, ThresholdKind};

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl RuleSource for CountingSource {
        async fn load_active_rules(&self) -> Result<Vec<AlertRule>, AppError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            Ok((0..=n)
                .map(|i| AlertRule {
                    id: Uuid::new_v4(),
                    name: format!("rule {i}"),
                    change_kind: ChangeKind::Price,
                    direction: Direction::Any,
                    threshold: 5.0,
                    threshold_kind: ThresholdKind::Percentage,
                    enabled: true,
                })
                .collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reuses_set_until_ttl() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cache = RuleCache::new(source.clone(), Duration::from_secs(60));

        let first = cache.snapshot().await.unwrap();
        let second = cache.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = cache.snapshot().await.unwrap();
        assert_eq!(third.len(), 2);
        // Sets handed out earlier are untouched by the reload.
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_swaps_immediately() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cache = RuleCache::new(source, Duration::from_secs(3600));
        let before = cache.snapshot().await.unwrap();
        let refreshed = cache.refresh().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &refreshed));
        assert!(Arc::ptr_eq(&refreshed, &cache.snapshot().await.unwrap()));
    }
}
