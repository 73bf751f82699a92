use crate::error::ArenaError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Response cache keyed by a hash of the request kind and body.
///
/// A retried request gets the bytes of the first successful response back.
/// Concurrent identical requests wait on the same cell, so the handler runs
/// once. Failures are not cached.
pub struct IdempotencyCache {
    entries: Mutex<HashMap<[u8; 32], Entry>>,
    ttl: Duration,
}

struct Entry {
    cell: Arc<OnceCell<Vec<u8>>>,
    inserted: Instant,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn get_or_compute<Req, Resp, F, Fut>(
        &self,
        kind: &str,
        request: &Req,
        compute: F,
    ) -> Result<Resp, ArenaError>
    where
        Req: Serialize,
        Resp: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Resp, ArenaError>>,
    {
        let body = serde_json::to_vec(request).map_err(|e| ArenaError::Internal(e.to_string()))?;
        let key = crate::core::hash_concat(kind.as_bytes(), &body);
        let cell = self.cell_for(key)?;

        let bytes = cell
            .get_or_try_init(|| async {
                let response = compute().await?;
                serde_json::to_vec(&response).map_err(|e| ArenaError::Internal(e.to_string()))
            })
            .await?;
        serde_json::from_slice(bytes).map_err(|e| ArenaError::Internal(e.to_string()))
    }

    fn cell_for(&self, key: [u8; 32]) -> Result<Arc<OnceCell<Vec<u8>>>, ArenaError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ArenaError::Internal("idempotency cache poisoned".into()))?;
        let now = Instant::now();
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.inserted) < ttl);
        let entry = entries.entry(key).or_insert_with(|| Entry {
            cell: Arc::new(OnceCell::new()),
            inserted: now,
        });
        Ok(entry.cell.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn identical_requests_share_a_response() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let run = || async move { Ok::<_, ArenaError>(calls.fetch_add(1, Ordering::SeqCst)) };
        let a: u32 = cache.get_or_compute("kind", &"body", run).await.unwrap();
        let b: u32 = cache.get_or_compute("kind", &"body", run).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let c: u32 = cache.get_or_compute("other", &"body", run).await.unwrap();
        assert_eq!(c, 1);
    }

    #[tokio::test]
    async fn failures_are_retried() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let first: Result<u32, _> = cache
            .get_or_compute("kind", &1u8, || async { Err(ArenaError::TooManyInputs) })
            .await;
        assert_eq!(first, Err(ArenaError::TooManyInputs));
        let second: u32 = cache.get_or_compute("kind", &1u8, || async { Ok(9) }).await.unwrap();
        assert_eq!(second, 9);
    }

    #[tokio::test]
    async fn concurrent_duplicates_run_once() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicU32::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute("kind", &"same", || async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, ArenaError>(calls.fetch_add(1, Ordering::SeqCst))
                        })
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), 0u32);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = IdempotencyCache::new(Duration::from_millis(10));
        let _: u32 = cache.get_or_compute("kind", &"x", || async { Ok(1) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let again: u32 = cache.get_or_compute("kind", &"x", || async { Ok(2) }).await.unwrap();
        assert_eq!(again, 2);
    }
}
