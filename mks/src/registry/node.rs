use std::sync::Arc;

use common::Node;
use tokio::sync::RwLock;

use super::{NODE_PREFIX, RegistryError, stamp_metadata};
use crate::storage::{self, Storage, StorageError};

const KIND: &str = "node";

pub struct NodeRegistry {
    storage: Arc<dyn Storage>,
    lock: RwLock<()>,
}

impl NodeRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    fn key(name: &str) -> String {
        format!("{NODE_PREFIX}{name}")
    }

    pub async fn create(&self, mut node: Node) -> Result<Node, RegistryError> {
        node.validate()?;
        let _guard = self.lock.write().await;
        let key = Self::key(&node.metadata.name);
        match storage::get_object::<Node>(self.storage.as_ref(), &key).await {
            Ok(_) => {
                return Err(RegistryError::AlreadyExists {
                    kind: KIND,
                    name: node.metadata.name,
                });
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        stamp_metadata(&mut node.metadata);
        storage::create_object(self.storage.as_ref(), &key, &node).await?;
        Ok(node)
    }

    pub async fn get(&self, name: &str) -> Result<Node, RegistryError> {
        let _guard = self.lock.read().await;
        match storage::get_object(self.storage.as_ref(), &Self::key(name)).await {
            Ok(node) => Ok(node),
            Err(StorageError::NotFound(_)) => Err(RegistryError::NotFound {
                kind: KIND,
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update(&self, node: &Node) -> Result<(), RegistryError> {
        node.validate()?;
        let _guard = self.lock.write().await;
        storage::update_object(self.storage.as_ref(), &Self::key(&node.metadata.name), node)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let _guard = self.lock.write().await;
        self.storage.delete(&Self::key(name)).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Node>, RegistryError> {
        let _guard = self.lock.read().await;
        Ok(storage::list_objects(self.storage.as_ref(), NODE_PREFIX).await?)
    }
}
