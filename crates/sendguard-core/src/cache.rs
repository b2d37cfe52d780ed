//! Probe result cache
//!
//! The existence probe is the only check that opens outbound connections
//! to third-party mail servers, so its results are cached per address and
//! shared between concurrent validation runs. Last-writer-wins is fine:
//! probe results are idempotent per address within the TTL window.

use sendguard_common::CheckOutcome;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheEntry {
    outcome: CheckOutcome,
    inserted_at: Instant,
}

/// In-memory key-value cache with TTL eviction.
///
/// A distributed cache is a drop-in substitute behind the same interface.
pub struct ProbeCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ProbeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch a live entry; expired entries are dropped on access
    pub async fn get(&self, key: &str) -> Option<CheckOutcome> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    return Some(entry.outcome.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it under the write lock.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() >= self.ttl {
                entries.remove(key);
            }
        }
        None
    }

    pub async fn set(&self, key: String, outcome: CheckOutcome) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                outcome,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of live entries (tests and introspection)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let cache = ProbeCache::new(Duration::from_secs(60));
        assert!(cache.get("k").await.is_none());

        cache
            .set("k".to_string(), CheckOutcome::valid("accepted"))
            .await;
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit.message, "accepted");
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = ProbeCache::new(Duration::from_millis(10));
        cache
            .set("k".to_string(), CheckOutcome::valid("accepted"))
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }
}
