//! Per-kind repositories over [`Storage`](crate::storage::Storage).
//!
//! Each registry owns one key prefix and is the canonical concurrency
//! boundary for its kind: a readers-writer lock serializes writes against
//! reads within this process. The store itself remains the source of
//! truth for conflicts across processes.

use chrono::Utc;
use common::{ObjectMeta, ValidationError};
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageError;

mod node;
mod pod;
mod replicaset;

pub use node::NodeRegistry;
pub use pod::PodRegistry;
pub use replicaset::ReplicaSetRegistry;

pub const POD_PREFIX: &str = "/pods/";
pub const NODE_PREFIX: &str = "/registry/nodes/";
pub const REPLICASET_PREFIX: &str = "/replicasets/";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Fills in the server-assigned metadata fields on create.
pub(crate) fn stamp_metadata(meta: &mut ObjectMeta) {
    if meta.uid.is_empty() {
        meta.uid = Uuid::new_v4().to_string();
    }
    if meta.creation_timestamp.is_none() {
        meta.creation_timestamp = Some(Utc::now());
    }
}
