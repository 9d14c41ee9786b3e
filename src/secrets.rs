use std::sync::Arc;

use dashmap::DashMap;
use rand::RngCore;
use tracing::{error, info};

use crate::ports::SecretStore;

/// Process-wide cache in front of a [`SecretStore`]. Owned explicitly by
/// whoever needs it; `clear`/`clear_all` reset it.
pub struct SecretCache {
    store: Arc<dyn SecretStore>,
    cached: DashMap<String, String>,
}

impl SecretCache {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store, cached: DashMap::new() }
    }

    /// Cached value, else the stored one, else create it from `fallback`.
    /// Store failures are logged and never surface: if creation fails the
    /// fallback is returned uncached.
    pub async fn fetch_or_create(&self, name: &str, fallback: impl FnOnce() -> String) -> String {
        if let Some(value) = self.cached.get(name) {
            return value.value().clone();
        }

        match self.store.get(name).await {
            Ok(Some(value)) if !value.is_empty() => {
                self.cached.insert(name.to_string(), value.clone());
                return value;
            }
            Ok(_) => {}
            Err(e) => error!("error fetching secret {name}: {e}"),
        }

        let value = fallback();
        match self.store.create(name, &value).await {
            Ok(()) => {
                info!("secret {name} created");
                self.cached.insert(name.to_string(), value.clone());
            }
            Err(e) => error!("error creating secret {name}: {e}"),
        }
        value
    }

    pub fn clear(&self, name: &str) {
        self.cached.remove(name);
    }

    pub fn clear_all(&self) {
        self.cached.clear();
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cached.contains_key(name)
    }
}

/// 32 random bytes, hex encoded.
pub fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingStore {
        values: Mutex<std::collections::HashMap<String, String>>,
        gets: AtomicUsize,
        fail_create: bool,
    }

    #[async_trait]
    impl SecretStore for CountingStore {
        async fn get(&self, name: &str) -> Result<Option<String>, PortError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.values.lock().unwrap().get(name).cloned())
        }

        async fn create(&self, name: &str, value: &str) -> Result<(), PortError> {
            if self.fail_create {
                return Err(PortError::new("secrets", "denied"));
            }
            self.values.lock().unwrap().insert(name.into(), value.into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn creates_once_then_serves_from_cache() {
        let store = Arc::new(CountingStore::default());
        let cache = SecretCache::new(store.clone());

        let first = cache.fetch_or_create("jwt", || "s3cret".into()).await;
        let second = cache.fetch_or_create("jwt", || "other".into()).await;
        assert_eq!(first, "s3cret");
        assert_eq!(second, "s3cret");
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_forces_refetch() {
        let store = Arc::new(CountingStore::default());
        store.values.lock().unwrap().insert("jwt".into(), "stored".into());
        let cache = SecretCache::new(store.clone());

        assert_eq!(cache.fetch_or_create("jwt", random_secret).await, "stored");
        cache.clear("jwt");
        assert!(!cache.is_cached("jwt"));
        assert_eq!(cache.fetch_or_create("jwt", random_secret).await, "stored");
        assert_eq!(store.gets.load(Ordering::SeqCst), 2);

        cache.clear_all();
        assert!(!cache.is_cached("jwt"));
    }

    #[tokio::test]
    async fn failed_creation_returns_fallback_uncached() {
        let store = Arc::new(CountingStore { fail_create: true, ..Default::default() });
        let cache = SecretCache::new(store);
        assert_eq!(cache.fetch_or_create("jwt", || "fallback".into()).await, "fallback");
        assert!(!cache.is_cached("jwt"));
    }

    #[test]
    fn random_secrets_are_hex() {
        let s = random_secret();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex::decode(&s).unwrap().len(), 32);
        assert_ne!(s, random_secret());
    }
}
