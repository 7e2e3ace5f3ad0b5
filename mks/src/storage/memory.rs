//! In-memory [`Storage`] used by registry, controller and scheduler tests
//! so they run without a live etcd.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::{Storage, StorageError, Watch, WatchEvent, WatchEventKind};

pub(crate) struct MemoryStorage {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStorage {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            data: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    fn put(&self, key: &str, value: &[u8]) {
        let old_value = self
            .data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        let kind = if old_value.is_some() {
            WatchEventKind::Update
        } else {
            WatchEventKind::Add
        };
        let _ = self.events.send(WatchEvent {
            kind,
            key: key.to_string(),
            value: value.to_vec(),
            old_value,
        });
    }

    fn remove(&self, key: &str) {
        let old_value = self.data.lock().unwrap().remove(key);
        if old_value.is_some() {
            let _ = self.events.send(WatchEvent {
                kind: WatchEventKind::Delete,
                key: key.to_string(),
                value: Vec::new(),
                old_value,
            });
        }
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.put(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn update(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.put(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let keys: Vec<String> = self
            .data
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.remove(&key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<Watch, StorageError> {
        let mut sub = self.events.subscribe();
        let prefix = prefix.to_string();
        let (tx, rx) = mpsc::channel(100);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = &mut stop_rx => return,
                    event = sub.recv() => event,
                };
                match event {
                    Ok(event) if event.key.starts_with(&prefix) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(Watch::new(rx, stop_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_not_found() {
        let storage = MemoryStorage::new();
        storage.create("/t/a", b"1").await.unwrap();
        assert_eq!(storage.get("/t/a").await.unwrap(), b"1");
        assert!(matches!(
            storage.get("/t/missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_is_ordered_and_prefix_scoped() {
        let storage = MemoryStorage::new();
        storage.create("/t/b", b"2").await.unwrap();
        storage.create("/t/a", b"1").await.unwrap();
        storage.create("/u/c", b"3").await.unwrap();
        let listed = storage.list("/t/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/t/a", "/t/b"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.create("/t/a", b"1").await.unwrap();
        storage.delete("/t/a").await.unwrap();
        storage.delete("/t/a").await.unwrap();
        assert!(storage.get("/t/a").await.is_err());
    }

    #[tokio::test]
    async fn watch_sees_put_update_delete() {
        let storage = MemoryStorage::new();
        let mut watch = storage.watch("/t/").await.unwrap();

        storage.create("/t/k1", b"v1").await.unwrap();
        storage.update("/t/k1", b"v2").await.unwrap();
        storage.delete("/t/k1").await.unwrap();
        // Events outside the prefix are not delivered.
        storage.create("/u/k1", b"x").await.unwrap();

        let added = watch.recv().await.unwrap();
        assert_eq!(added.kind, WatchEventKind::Add);
        assert_eq!(added.key, "/t/k1");
        assert_eq!(added.value, b"v1");

        let updated = watch.recv().await.unwrap();
        assert_eq!(updated.kind, WatchEventKind::Update);
        assert_eq!(updated.old_value.as_deref(), Some(b"v1".as_slice()));

        let deleted = watch.recv().await.unwrap();
        assert_eq!(deleted.kind, WatchEventKind::Delete);
        assert_eq!(deleted.old_value.as_deref(), Some(b"v2".as_slice()));

        watch.cancel();
        assert!(watch.recv().await.is_none());
    }
}
