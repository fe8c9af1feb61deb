//! In-process store with the same semantics as the shared bucket.
//!
//! Used by tests and by single-host setups without a NATS server. Supports
//! outage and per-key delete failure injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::{Store, Update, Watch, WatchEvent, matches, validate_key, validate_pattern};
use crate::error::{Result, SdError};

/// Live events retained for slow watchers before they start lagging.
const EVENT_CAPACITY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<Update>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_once: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            data: Mutex::new(BTreeMap::new()),
            events,
            failing_deletes: Mutex::new(HashSet::new()),
            failing_once: Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every delete of `key` fail until cleared.
    pub fn fail_deletes_for(&self, key: impl Into<String>) {
        lock(&self.failing_deletes).insert(key.into());
    }

    /// Make only the next delete of `key` fail.
    pub fn fail_next_delete(&self, key: impl Into<String>) {
        lock(&self.failing_once).insert(key.into());
    }

    pub fn clear_delete_failures(&self) {
        lock(&self.failing_deletes).clear();
        lock(&self.failing_once).clear();
    }

    /// Simulate the store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of every key and value.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        lock(&self.data).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.data).is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SdError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn publish(&self, update: Update) {
        // No receivers just means nobody is watching
        let _ = self.events.send(update);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        lock(&self.data)
            .get(key)
            .cloned()
            .ok_or_else(|| SdError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_available()?;
        validate_key(key)?;

        let mut data = lock(&self.data);
        data.insert(key.to_string(), value.clone());
        self.publish(Update::put(key, value));
        trace!(key, "put");
        Ok(())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_available()?;
        validate_key(key)?;

        let mut data = lock(&self.data);
        if data.contains_key(key) {
            return Err(SdError::AlreadyExists {
                key: key.to_string(),
            });
        }
        data.insert(key.to_string(), value.clone());
        self.publish(Update::put(key, value));
        trace!(key, "create");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;

        let injected =
            lock(&self.failing_once).remove(key) || lock(&self.failing_deletes).contains(key);
        if injected {
            return Err(SdError::StoreUnavailable(format!(
                "injected delete failure for {key}"
            )));
        }

        let mut data = lock(&self.data);
        if data.remove(key).is_some() {
            self.publish(Update::delete(key));
            trace!(key, "delete");
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(lock(&self.data)
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn watch(&self, pattern: &str) -> Result<Watch> {
        self.check_available()?;
        validate_pattern(pattern)?;

        // Subscribe while holding the data lock so no write falls between
        // the replay snapshot and the live stream.
        let (replay, mut live) = {
            let data = lock(&self.data);
            let live = self.events.subscribe();
            let replay: Vec<Update> = data
                .iter()
                .filter(|(key, _)| matches(pattern, key))
                .map(|(key, value)| Update::put(key.clone(), value.clone()))
                .collect();
            (replay, live)
        };

        let (watch, mut feed) = Watch::channel(pattern);
        let pattern = pattern.to_string();
        debug!(%pattern, replay = replay.len(), "Watch opened");

        tokio::spawn(async move {
            for update in replay {
                if !feed.send(WatchEvent::Update(update)).await {
                    return;
                }
            }
            if !feed.send(WatchEvent::ReplayComplete).await {
                return;
            }

            loop {
                let received = tokio::select! {
                    () = feed.cancelled() => break,
                    received = live.recv() => received,
                };

                match received {
                    Ok(update) if matches(&pattern, &update.key) => {
                        if !feed.send(WatchEvent::Update(update)).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%pattern, skipped, "Watch lagged, updates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(%pattern, "Watch closed");
        });

        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Operation;
    use std::sync::Arc;
    use std::time::Duration;

    async fn next(watch: &mut Watch) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(2), watch.recv())
            .await
            .expect("watch event timed out")
            .expect("watch closed")
    }

    #[tokio::test]
    async fn test_get_put_delete() {
        let store = MemoryStore::new();
        assert!(store.get("a.b").await.unwrap_err().is_not_found());

        store.put("a.b", b"1".to_vec()).await.unwrap();
        assert_eq!(store.get("a.b").await.unwrap(), b"1");

        store.put("a.b", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("a.b").await.unwrap(), b"2");

        store.delete("a.b").await.unwrap();
        assert!(store.get("a.b").await.unwrap_err().is_not_found());
        store.delete("a.b").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_is_first_writer_wins() {
        let store = MemoryStore::new();
        store.create("a.b", b"first".to_vec()).await.unwrap();
        let err = store.create("a.b", b"second".to_vec()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get("a.b").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_concurrent_create_exactly_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create("k.x", b"A".to_vec()).await })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create("k.x", b"B".to_vec()).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(a.is_ok() ^ b.is_ok());
        let loser = if a.is_ok() { &b } else { &a };
        assert!(loser.as_ref().unwrap_err().is_conflict());

        let winner: &[u8] = if a.is_ok() { b"A" } else { b"B" };
        assert_eq!(store.get("k.x").await.unwrap(), winner);
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let store = MemoryStore::new();
        for key in ["a.b", "a.b.c", "a.bc", "a.c", "b.a"] {
            store.put(key, Vec::new()).await.unwrap();
        }
        assert_eq!(
            store.list_keys("a.b.").await.unwrap(),
            vec!["a.b.c".to_string()]
        );
        assert_eq!(store.list_keys("a.b").await.unwrap().len(), 3);
        assert!(store.list_keys("z.").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put("a..b", Vec::new()).await,
            Err(SdError::InvalidKey(_))
        ));
        assert!(store.watch("a.>.b").await.is_err());
    }

    #[tokio::test]
    async fn test_watch_replays_then_marks_then_streams() {
        let store = MemoryStore::new();
        store.put("x.1.buffer", vec![1]).await.unwrap();
        store.put("x.2.buffer", vec![2]).await.unwrap();
        store.put("x.2", vec![9]).await.unwrap();

        let mut watch = store.watch("x.*.buffer").await.unwrap();
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Update(Update::put("x.1.buffer", vec![1]))
        );
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Update(Update::put("x.2.buffer", vec![2]))
        );
        assert_eq!(next(&mut watch).await, WatchEvent::ReplayComplete);

        store.put("x.3", vec![0]).await.unwrap();
        store.put("x.3.buffer", vec![3]).await.unwrap();
        store.delete("x.1.buffer").await.unwrap();

        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Update(Update::put("x.3.buffer", vec![3]))
        );
        match next(&mut watch).await {
            WatchEvent::Update(update) => {
                assert_eq!(update.key, "x.1.buffer");
                assert_eq!(update.operation, Operation::Delete);
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_watch_still_marks_replay() {
        let store = MemoryStore::new();
        let mut watch = store.watch("nothing.>").await.unwrap();
        assert_eq!(next(&mut watch).await, WatchEvent::ReplayComplete);
    }

    #[tokio::test]
    async fn test_stopped_watch_ends() {
        let store = MemoryStore::new();
        let mut watch = store.watch("a.>").await.unwrap();
        assert_eq!(next(&mut watch).await, WatchEvent::ReplayComplete);
        watch.stop();
        store.put("a.b", vec![1]).await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(2), watch.recv())
            .await
            .unwrap();
        assert!(ended.is_none());
    }

    #[tokio::test]
    async fn test_outage_and_delete_injection() {
        let store = MemoryStore::new();
        store.put("a.b", vec![1]).await.unwrap();

        store.fail_deletes_for("a.b");
        assert!(store.delete("a.b").await.unwrap_err().is_transient());
        store.clear_delete_failures();
        store.delete("a.b").await.unwrap();

        store.put("a.c", vec![2]).await.unwrap();
        store.fail_next_delete("a.c");
        assert!(store.delete("a.c").await.is_err());
        store.delete("a.c").await.unwrap();
        assert!(store.is_empty());

        store.set_unavailable(true);
        assert!(store.get("a.b").await.unwrap_err().is_transient());
        assert!(store.list_keys("a").await.is_err());
        store.set_unavailable(false);
        assert!(store.list_keys("a").await.unwrap().is_empty());
    }
}
