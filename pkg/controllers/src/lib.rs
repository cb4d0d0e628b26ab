pub mod hpa;
pub mod replicaset;
