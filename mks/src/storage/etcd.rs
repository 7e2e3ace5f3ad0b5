use std::sync::Arc;
use std::time::Duration;

use etcd_client::{
    Client, ConnectOptions, DeleteOptions, EventType, GetOptions, WatchOptions,
};
use tokio::sync::{RwLock, mpsc, oneshot};

use super::{Storage, StorageError, Watch, WatchEvent, WatchEventKind};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

const WATCH_CHANNEL_BUFFER: usize = 100;

/// [`Storage`] backed by an etcd cluster. The client is shared behind a
/// lock because every etcd call needs exclusive access to it.
#[derive(Clone)]
pub struct EtcdStorage {
    client: Arc<RwLock<Client>>,
}

impl EtcdStorage {
    pub async fn connect(
        endpoints: &[String],
        dial_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let options = ConnectOptions::new().with_connect_timeout(dial_timeout);
        let client = Client::connect(endpoints, Some(options)).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
        })
    }
}

#[async_trait::async_trait]
impl Storage for EtcdStorage {
    async fn create(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut client = self.client.write().await;
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut client = self.client.write().await;
        let resp = client.get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(kv.value().to_vec()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn update(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut client = self.client.write().await;
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut client = self.client.write().await;
        client.delete(key, None).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let mut client = self.client.write().await;
        client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut client = self.client.write().await;
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).to_string(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<Watch, StorageError> {
        let options = WatchOptions::new().with_prefix().with_prev_key();
        let (mut watcher, mut stream) = {
            let mut client = self.client.write().await;
            client.watch(prefix, Some(options)).await?
        };

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut stop_rx => None,
                    msg = stream.message() => Some(msg),
                };
                let Some(message) = message else {
                    let _ = watcher.cancel().await;
                    return;
                };
                match message {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            return;
                        }
                        for event in resp.events() {
                            let Some(converted) = convert_event(event) else {
                                continue;
                            };
                            if tx.send(converted).await.is_err() {
                                // Consumer went away; tear down the etcd watch.
                                let _ = watcher.cancel().await;
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        log::error!(target: "mks::storage", "watch stream error: {e}");
                        return;
                    }
                }
            }
        });

        Ok(Watch::new(rx, stop_tx))
    }
}

fn convert_event(event: &etcd_client::Event) -> Option<WatchEvent> {
    let kv = event.kv()?;
    let key = String::from_utf8_lossy(kv.key()).to_string();
    let old_value = event.prev_kv().map(|prev| prev.value().to_vec());
    match event.event_type() {
        EventType::Put => Some(WatchEvent {
            kind: if old_value.is_some() {
                WatchEventKind::Update
            } else {
                WatchEventKind::Add
            },
            key,
            value: kv.value().to_vec(),
            old_value,
        }),
        EventType::Delete => Some(WatchEvent {
            kind: WatchEventKind::Delete,
            key,
            value: Vec::new(),
            old_value,
        }),
    }
}
