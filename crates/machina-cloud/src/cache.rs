//! Single-flight TTL cache
//!
//! Shared across reconcilers for expensive describe-all calls (instance types
//! per region, the region list). Each key has its own slot behind an async
//! mutex: a stale or missing entry is refreshed while holding that slot, so at
//! most one loader runs per key and a slow refresh never blocks other keys.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    refreshed_at: Instant,
}

impl<V> Entry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.refreshed_at.elapsed() < ttl
    }
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: RwLock<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn slot(&self, key: &K) -> Slot<V> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        self.slots.write().await.entry(key.clone()).or_default().clone()
    }

    /// Returns the cached value for `key`, running `loader` when the entry is
    /// missing or older than the TTL. A failed load leaves the cache untouched.
    pub async fn get<F, Fut, E>(&self, key: &K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key).await;
        let mut entry = slot.lock().await;
        // a concurrent caller may have refreshed while we waited on the slot
        if let Some(entry) = entry.as_ref().filter(|e| e.is_fresh(self.ttl)) {
            return Ok(entry.value.clone());
        }

        let value = loader().await?;
        *entry = Some(Entry {
            value: value.clone(),
            refreshed_at: Instant::now(),
        });
        Ok(value)
    }

    pub async fn invalidate(&self, key: &K) {
        let slot = self.slots.read().await.get(key).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_caches_value() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);
        let counter = &loads;

        for _ in 0..3 {
            let value = cache
                .get(&"us-east-1".to_string(), || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_refreshes_after_ttl() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(30 * 60));
        let loads = AtomicUsize::new(0);
        let counter = &loads;
        let load = || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) as u32) };

        assert_eq!(cache.get(&"regions", load).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert_eq!(cache.get(&"regions", load).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert_eq!(cache.get(&"regions", load).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));

        let err = cache
            .get(&"eu-west-1", || async { Err::<u32, _>("throttled") })
            .await;
        assert_eq!(err, Err("throttled"));

        let ok = cache.get(&"eu-west-1", || async { Ok::<_, &str>(3) }).await;
        assert_eq!(ok, Ok(3));
    }

    #[tokio::test]
    async fn test_concurrent_misses_load_once() {
        let cache = Arc::new(TtlCache::<String, u32>::new(Duration::from_secs(60)));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(&"ap-south-1".to_string(), move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(42)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_refresh_does_not_block_other_keys() {
        let cache = Arc::new(TtlCache::<&str, u32>::new(Duration::from_secs(60)));
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let (started, loading) = tokio::sync::oneshot::channel::<()>();

        let slow = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get(&"us-east-1", || async move {
                        let _ = started.send(());
                        let _ = released.await;
                        Ok::<_, String>(1)
                    })
                    .await
            }
        });
        loading.await.unwrap();

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get(&"eu-west-1", || async { Ok::<_, String>(2) }),
        )
        .await;
        assert_eq!(other.unwrap(), Ok(2));

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), Ok(1));
        assert_eq!(cache.get(&"us-east-1", || async { Ok::<_, String>(9) }).await, Ok(1));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::from_secs(60));
        cache.get(&1, || async { Ok::<_, ()>(1) }).await.unwrap();
        cache.invalidate(&1).await;
        assert_eq!(cache.get(&1, || async { Ok::<_, ()>(2) }).await, Ok(2));
    }
}
