//! Reconciliation loops that drive actual state toward desired state.

pub mod replicaset;

pub use replicaset::ReplicaSetController;
