use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod names;
pub mod retry;

/// Minimal metadata carried by every persisted object.
///
/// `uid` and `creation_timestamp` are assigned by the server on create and
/// should be left empty by clients. `resource_version` is opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(
        rename = "resourceVersion",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub resource_version: String,
    #[serde(
        rename = "creationTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// A single container in a pod spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Kept for compatibility with older clients; replica management lives
    /// on the ReplicaSet.
    #[serde(default)]
    pub replicas: i32,
}

/// Lifecycle phase of a pod. A pod with status `Scheduled` or later has a
/// non-empty node name; a `Pending` pod has none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodStatus {
    #[default]
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(rename = "nodeName", default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metadata.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        validate_pod_spec(&self.spec)
    }

    /// A pod counts toward its replica set as long as it has not failed.
    pub fn is_active(&self) -> bool {
        self.status != PodStatus::Failed
    }

    /// Ownership is inferred from the name prefix: generated pod names are
    /// `<owner>-<suffix>`, so a prefix match identifies the owner.
    pub fn is_owned_by(&self, owner: &ObjectMeta) -> bool {
        self.metadata.name.starts_with(&owner.name)
    }
}

/// Validates a pod spec independent of where it appears (a pod or a
/// replica-set template).
pub fn validate_pod_spec(spec: &PodSpec) -> Result<(), ValidationError> {
    if spec.containers.is_empty() {
        return Err(ValidationError::NoContainers);
    }
    for container in &spec.containers {
        if container.image.is_empty() {
            return Err(ValidationError::EmptyImage(container.name.clone()));
        }
    }
    if spec.replicas < 0 {
        return Err(ValidationError::NegativeReplicas(spec.replicas));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(rename = "providerID", default, skip_serializing_if = "String::is_empty")]
    pub provider_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    NotReady,
    Ready,
    MemoryPressure,
    DiskPressure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metadata.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok(())
    }

    /// A node accepts new pods unless it has been cordoned off.
    pub fn is_schedulable(&self) -> bool {
        !self.spec.unschedulable
    }
}

/// Metadata plus pod spec stamped onto every pod a replica set creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetSpec {
    pub replicas: i32,
    /// Informational in this system; ownership is decided by name prefix.
    #[serde(default)]
    pub selector: HashMap<String, String>,
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetStatus {
    #[serde(default)]
    pub replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSet {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
}

impl ReplicaSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metadata.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.spec.replicas < 0 {
            return Err(ValidationError::NegativeReplicas(self.spec.replicas));
        }
        validate_pod_spec(&self.spec.template.spec)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("metadata.name must not be empty")]
    EmptyName,
    #[error("spec must declare at least one container")]
    NoContainers,
    #[error("container {0:?} has an empty image")]
    EmptyImage(String),
    #[error("replica count must not be negative, got {0}")]
    NegativeReplicas(i32),
}
