use std::sync::Arc;

use common::{Pod, PodStatus};
use tokio::sync::RwLock;

use super::{POD_PREFIX, RegistryError, stamp_metadata};
use crate::storage::{self, Storage, StorageError};

const KIND: &str = "pod";

pub struct PodRegistry {
    storage: Arc<dyn Storage>,
    lock: RwLock<()>,
}

impl PodRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    fn key(name: &str) -> String {
        format!("{POD_PREFIX}{name}")
    }

    /// Validates and persists a new pod, assigning server-side metadata.
    /// Fails with [`RegistryError::AlreadyExists`] when the name is taken.
    pub async fn create(&self, mut pod: Pod) -> Result<Pod, RegistryError> {
        pod.validate()?;
        let _guard = self.lock.write().await;
        let key = Self::key(&pod.metadata.name);
        match storage::get_object::<Pod>(self.storage.as_ref(), &key).await {
            Ok(_) => {
                return Err(RegistryError::AlreadyExists {
                    kind: KIND,
                    name: pod.metadata.name,
                });
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        stamp_metadata(&mut pod.metadata);
        storage::create_object(self.storage.as_ref(), &key, &pod).await?;
        Ok(pod)
    }

    pub async fn get(&self, name: &str) -> Result<Pod, RegistryError> {
        let _guard = self.lock.read().await;
        match storage::get_object(self.storage.as_ref(), &Self::key(name)).await {
            Ok(pod) => Ok(pod),
            Err(StorageError::NotFound(_)) => Err(RegistryError::NotFound {
                kind: KIND,
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort upsert; existence checks are the caller's business.
    pub async fn update(&self, pod: &Pod) -> Result<(), RegistryError> {
        pod.validate()?;
        let _guard = self.lock.write().await;
        storage::update_object(self.storage.as_ref(), &Self::key(&pod.metadata.name), pod)
            .await?;
        Ok(())
    }

    /// Deleting a pod that does not exist is not an error.
    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let _guard = self.lock.write().await;
        self.storage.delete(&Self::key(name)).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Pod>, RegistryError> {
        let _guard = self.lock.read().await;
        Ok(storage::list_objects(self.storage.as_ref(), POD_PREFIX).await?)
    }

    /// Pods waiting for a node assignment.
    pub async fn list_pending(&self) -> Result<Vec<Pod>, RegistryError> {
        let pods = self.list().await?;
        Ok(pods
            .into_iter()
            .filter(|pod| pod.status == PodStatus::Pending)
            .collect())
    }

    /// Pods with no node name. In the current design this is the same set
    /// as the pending pods, but callers depend on each filter separately.
    pub async fn list_unassigned(&self) -> Result<Vec<Pod>, RegistryError> {
        let pods = self.list().await?;
        Ok(pods
            .into_iter()
            .filter(|pod| pod.node_name.as_deref().is_none_or(str::is_empty))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use common::{Container, ObjectMeta, PodSpec};

    fn registry() -> PodRegistry {
        PodRegistry::new(Arc::new(MemoryStorage::new()))
    }

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    image: "nginx:latest".to_string(),
                }],
                replicas: 1,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = registry();
        let created = registry.create(pod("web")).await.unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert!(created.metadata.creation_timestamp.is_some());
        assert_eq!(created.status, PodStatus::Pending);

        let fetched = registry.get("web").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_invalid_specs() {
        let registry = registry();
        registry.create(pod("web")).await.unwrap();
        assert!(matches!(
            registry.create(pod("web")).await,
            Err(RegistryError::AlreadyExists { .. })
        ));

        let mut invalid = pod("bad");
        invalid.spec.containers.clear();
        assert!(matches!(
            registry.create(invalid).await,
            Err(RegistryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.get("ghost").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_changes_the_stored_spec() {
        let registry = registry();
        let mut created = registry.create(pod("web")).await.unwrap();
        created.spec.containers[0].image = "nginx:1.27".to_string();
        registry.update(&created).await.unwrap();
        let fetched = registry.get("web").await.unwrap();
        assert_eq!(fetched.spec.containers[0].image, "nginx:1.27");
    }

    #[tokio::test]
    async fn delete_twice_succeeds() {
        let registry = registry();
        registry.create(pod("web")).await.unwrap();
        registry.delete("web").await.unwrap();
        registry.delete("web").await.unwrap();
        assert!(matches!(
            registry.get("web").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn pending_and_unassigned_filters() {
        let registry = registry();
        registry.create(pod("a")).await.unwrap();

        let mut scheduled = pod("b");
        scheduled.status = PodStatus::Scheduled;
        scheduled.node_name = Some("node1".to_string());
        registry.create(scheduled).await.unwrap();

        let pending = registry.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].metadata.name, "a");

        let unassigned = registry.list_unassigned().await.unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].metadata.name, "a");
    }
}
