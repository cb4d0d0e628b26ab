use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::meta::{ObjectMeta, OwnerReference, TypeMeta};

// --- Pod phase ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

// --- Container spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// --- Container status ---

/// Last reported state of one container, including the utilization
/// percentages the autoscaler aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// Runtime state string: "created", "running", "exited", ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub exit_code: i32,
    /// CPU usage as a percentage of one core (e.g. 50.0 = 50%).
    #[serde(default)]
    pub cpu_percent: f64,
    /// Memory usage as a percentage of the container limit.
    #[serde(default)]
    pub mem_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
}

// --- Pod spec / status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    /// The node this pod is assigned to (set by the scheduler).
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

// --- Pod template ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

// --- Pod ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// The ReplicaSet owner reference controlling this pod, if any.
    /// Linear scan; among a pod's owner references at most one ReplicaSet
    /// reference is the controlling parent.
    pub fn owner_replicaset(&self) -> Option<&OwnerReference> {
        self.metadata
            .owner_references
            .iter()
            .find(|r| r.kind == "ReplicaSet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_replicaset_scan() {
        let mut pod = Pod {
            metadata: ObjectMeta {
                name: "web-1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(pod.owner_replicaset().is_none());

        pod.metadata.owner_references.push(OwnerReference {
            kind: "HorizontalPodAutoscaler".to_string(),
            name: "web-hpa".to_string(),
            api_version: "v1".to_string(),
            uid: "hpa-1".to_string(),
        });
        pod.metadata.owner_references.push(OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: "web".to_string(),
            api_version: "v1".to_string(),
            uid: "rs-1".to_string(),
        });
        assert_eq!(pod.owner_replicaset().map(|r| r.uid.as_str()), Some("rs-1"));
    }
}
