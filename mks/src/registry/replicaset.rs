use std::sync::Arc;

use common::ReplicaSet;
use tokio::sync::RwLock;

use super::{REPLICASET_PREFIX, RegistryError, stamp_metadata};
use crate::storage::{self, Storage, StorageError};

const KIND: &str = "replicaset";

pub struct ReplicaSetRegistry {
    storage: Arc<dyn Storage>,
    lock: RwLock<()>,
}

impl ReplicaSetRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    fn key(name: &str) -> String {
        format!("{REPLICASET_PREFIX}{name}")
    }

    pub async fn create(&self, mut rs: ReplicaSet) -> Result<ReplicaSet, RegistryError> {
        rs.validate()?;
        let _guard = self.lock.write().await;
        let key = Self::key(&rs.metadata.name);
        match storage::get_object::<ReplicaSet>(self.storage.as_ref(), &key).await {
            Ok(_) => {
                return Err(RegistryError::AlreadyExists {
                    kind: KIND,
                    name: rs.metadata.name,
                });
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        stamp_metadata(&mut rs.metadata);
        storage::create_object(self.storage.as_ref(), &key, &rs).await?;
        Ok(rs)
    }

    pub async fn get(&self, name: &str) -> Result<ReplicaSet, RegistryError> {
        let _guard = self.lock.read().await;
        match storage::get_object(self.storage.as_ref(), &Self::key(name)).await {
            Ok(rs) => Ok(rs),
            Err(StorageError::NotFound(_)) => Err(RegistryError::NotFound {
                kind: KIND,
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update(&self, rs: &ReplicaSet) -> Result<(), RegistryError> {
        rs.validate()?;
        let _guard = self.lock.write().await;
        storage::update_object(self.storage.as_ref(), &Self::key(&rs.metadata.name), rs).await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let _guard = self.lock.write().await;
        self.storage.delete(&Self::key(name)).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ReplicaSet>, RegistryError> {
        let _guard = self.lock.read().await;
        Ok(storage::list_objects(self.storage.as_ref(), REPLICASET_PREFIX).await?)
    }
}
