use serde::{Deserialize, Serialize};

use crate::meta::{LabelSelector, ObjectMeta, OwnerReference, TypeMeta};
use crate::pod::PodTemplateSpec;

/// Sentinel value for `ReplicaSetStatus.replicas` meaning replica management
/// has been transferred to a HorizontalPodAutoscaler. The ReplicaSet
/// controller must skip normal reconciliation while this holds.
pub const HPA_CONTROLLED: i32 = -1;

// --- ReplicaSet status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    /// Most recently observed number of owned replicas, or [`HPA_CONTROLLED`].
    pub replicas: i32,
}

// --- ReplicaSet spec ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    pub replicas: i32,
    #[serde(default)]
    pub selector: LabelSelector,
    #[serde(default)]
    pub template: PodTemplateSpec,
}

// --- ReplicaSet ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
}

impl ReplicaSet {
    /// True while an autoscaler owns replica management for this set.
    pub fn hpa_controlled(&self) -> bool {
        self.status.replicas == HPA_CONTROLLED
    }

    /// Owner reference pointing at this ReplicaSet, for adopted/created pods.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: self.metadata.name.clone(),
            api_version: self.type_meta.api_version.clone(),
            uid: self.metadata.uid.clone(),
        }
    }
}
