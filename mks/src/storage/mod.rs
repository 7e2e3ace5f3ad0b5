//! Typed key-value facade over the cluster store.
//!
//! Domain objects are JSON-encoded byte payloads keyed by path prefixes.
//! The [`Storage`] trait is the byte-level contract; the `*_object` helpers
//! layer encoding and decoding on top so registries never touch bytes.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

mod etcd;
#[cfg(test)]
pub(crate) mod memory;

pub use etcd::EtcdStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("error encoding object: {0}")]
    Encoding(#[source] serde_json::Error),
    #[error("error decoding object: {0}")]
    Decoding(#[source] serde_json::Error),
    #[error("kv client error: {0}")]
    Client(#[from] etcd_client::Error),
}

/// The kind of change a watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Add,
    Update,
    Delete,
}

/// A single change under a watched prefix. `value` is empty for deletes;
/// `old_value` is the state the change replaced, when the store knows it.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    pub value: Vec<u8>,
    pub old_value: Option<Vec<u8>>,
}

/// A cancellable stream of [`WatchEvent`]s, delivered in per-key commit
/// order. The stream closes on [`Watch::cancel`], on drop, or when the
/// underlying store terminates it.
pub struct Watch {
    events: mpsc::Receiver<WatchEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl Watch {
    fn new(events: mpsc::Receiver<WatchEvent>, stop: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop: Some(stop),
        }
    }

    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Byte-level storage operations. Create and update are both plain puts;
/// existence checks belong to the registries above. Delete is idempotent.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn update(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;

    /// Key-value pairs under `prefix` in lexicographic key order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    async fn watch(&self, prefix: &str) -> Result<Watch, StorageError>;
}

pub async fn create_object<T: Serialize + Sync>(
    storage: &dyn Storage,
    key: &str,
    obj: &T,
) -> Result<(), StorageError> {
    let data = serde_json::to_vec(obj).map_err(StorageError::Encoding)?;
    storage.create(key, &data).await
}

pub async fn get_object<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<T, StorageError> {
    let data = storage.get(key).await?;
    serde_json::from_slice(&data).map_err(StorageError::Decoding)
}

pub async fn update_object<T: Serialize + Sync>(
    storage: &dyn Storage,
    key: &str,
    obj: &T,
) -> Result<(), StorageError> {
    let data = serde_json::to_vec(obj).map_err(StorageError::Encoding)?;
    storage.update(key, &data).await
}

pub async fn list_objects<T: DeserializeOwned>(
    storage: &dyn Storage,
    prefix: &str,
) -> Result<Vec<T>, StorageError> {
    let mut objects = Vec::new();
    for (_, data) in storage.list(prefix).await? {
        objects.push(serde_json::from_slice(&data).map_err(StorageError::Decoding)?);
    }
    Ok(objects)
}
