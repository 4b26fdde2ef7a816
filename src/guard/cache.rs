use std::{num::NonZeroUsize, time::Duration};

use lru::LruCache;
use tokio::{sync::Mutex, time::Instant};

use crate::{config::CacheConfig, context::RequestContext, guard::decision::Decision};

pub const CACHE_KEY_MAX_LEN: usize = 100;
const SIGNATURE_PREFIX_LEN: usize = 20;

/// Builds the coalescing key for a request: method, path and the first few
/// characters of the client signature.
pub fn cache_key(ctx: &RequestContext) -> String {
    let signature: String = ctx.user_agent.chars().take(SIGNATURE_PREFIX_LEN).collect();
    let key = format!("{}-{}-{}", ctx.method, ctx.pathname, signature);

    if key.chars().count() > CACHE_KEY_MAX_LEN {
        key.chars().take(CACHE_KEY_MAX_LEN).collect()
    } else {
        key
    }
}

struct CacheEntry {
    decision: Decision,
    created_at: Instant,
}

/// Bounded LRU of recent decisions. Entries older than the TTL are never
/// served, even when capacity has not forced them out yet.
pub struct DecisionCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(cfg.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: cfg.ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Decision> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let fresh = entries
            .get(key)
            .map(|entry| now.duration_since(entry.created_at) <= self.ttl)?;

        if !fresh {
            entries.pop(key);
            return None;
        }

        entries.peek(key).map(|entry| entry.decision.clone())
    }

    pub async fn set(&self, key: String, decision: Decision) {
        let mut entries = self.entries.lock().await;
        // `put` drops the least recently used entry when full and the key is new.
        entries.put(key, CacheEntry {
            decision,
            created_at: Instant::now(),
        });
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CACHE_KEY_MAX_LEN, DecisionCache, cache_key};
    use crate::{config::CacheConfig, context::RequestContext, guard::decision::Decision};

    fn cache(capacity: usize) -> DecisionCache {
        DecisionCache::new(&CacheConfig {
            ttl: Duration::from_secs(300),
            capacity,
        })
    }

    fn block(reason: &str) -> Decision {
        Decision::Block {
            status_code: None,
            reasoning: reason.to_string(),
        }
    }

    fn ctx(method: &str, pathname: &str, user_agent: &str) -> RequestContext {
        RequestContext {
            method: method.to_string(),
            pathname: pathname.to_string(),
            url: format!("http://localhost{pathname}"),
            user_agent: user_agent.to_string(),
            ip: "127.0.0.1".to_string(),
            body: None,
        }
    }

    #[test]
    fn key_uses_signature_prefix() {
        let a = cache_key(&ctx("GET", "/quiz", "Mozilla/5.0 (X11; Linux x86_64) Gecko"));
        let b = cache_key(&ctx("GET", "/quiz", "Mozilla/5.0 (X11; Linux aarch64) Firefox"));

        assert_eq!(a, "GET-/quiz-Mozilla/5.0 (X11; Li");
        assert_eq!(a, b);
    }

    #[test]
    fn long_keys_truncate_to_max_length() {
        let path = format!("/{}", "q".repeat(250));
        let key = cache_key(&ctx("GET", &path, "curl/8.0"));
        assert_eq!(key.chars().count(), CACHE_KEY_MAX_LEN);
        assert!(key.starts_with("GET-/qqq"));
    }

    #[tokio::test(start_paused = true)]
    async fn get_after_set_returns_decision_within_ttl() {
        let cache = cache(10);
        cache.set("k".to_string(), block("bot")).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await, Some(block("bot")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_read() {
        let cache = cache(10);
        cache.set("k".to_string(), Decision::allow()).await;

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn accessed_key_survives_eviction() {
        let cache = cache(2);
        cache.set("A".to_string(), block("a")).await;
        cache.set("B".to_string(), block("b")).await;
        assert!(cache.get("A").await.is_some());

        cache.set("C".to_string(), block("c")).await;

        assert_eq!(cache.get("B").await, None);
        assert_eq!(cache.get("A").await, Some(block("a")));
        assert_eq!(cache.get("C").await, Some(block("c")));
    }

    #[tokio::test]
    async fn overflow_keeps_most_recent_keys() {
        let cache = cache(3);
        for key in ["k1", "k2", "k3", "k4", "k5"] {
            cache.set(key.to_string(), Decision::allow()).await;
        }

        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.get("k1").await, None);
        assert_eq!(cache.get("k2").await, None);
        for key in ["k3", "k4", "k5"] {
            assert_eq!(cache.get(key).await, Some(Decision::allow()));
        }
    }

    #[tokio::test]
    async fn reinserting_existing_key_does_not_evict() {
        let cache = cache(2);
        cache.set("A".to_string(), Decision::allow()).await;
        cache.set("B".to_string(), Decision::allow()).await;
        cache.set("A".to_string(), block("updated")).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("A").await, Some(block("updated")));
        assert_eq!(cache.get("B").await, Some(Decision::allow()));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache = cache(4);
        cache.set("A".to_string(), Decision::allow()).await;
        cache.set("B".to_string(), Decision::allow()).await;
        cache.clear().await;

        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.get("A").await, None);
    }
}
