use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, OwnerReference, TypeMeta};

// --- Scale target ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub api_version: String,
}

// --- Metrics ---

/// Only "Resource" metrics are supported; anything else decodes to
/// `Unsupported` and is rejected at reconcile time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricSourceType {
    #[default]
    Resource,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTarget {
    /// Target average utilization as a percentage (e.g. 50 = 50%).
    #[serde(default)]
    pub average_utilization: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricSource {
    /// Resource name: "cpu" or "memory".
    pub name: String,
    #[serde(default)]
    pub target: MetricTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    #[serde(rename = "type", default)]
    pub source_type: MetricSourceType,
    #[serde(default)]
    pub resource: ResourceMetricSource,
}

// --- Scaling behavior ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingPolicySelect {
    /// Select the policy permitting the highest rate of change.
    #[default]
    Max,
    /// Select the policy permitting the lowest rate of change.
    Min,
    /// Disable scaling in this direction entirely.
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingPolicyType {
    /// An absolute number of pods per period.
    #[default]
    Pods,
    /// A percentage of the current replica count per period.
    Percent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    #[serde(rename = "type", default)]
    pub policy_type: ScalingPolicyType,
    pub value: i32,
    pub period_seconds: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRules {
    /// Minimum seconds since the last applied scale before another scale in
    /// this direction is permitted.
    #[serde(default)]
    pub stabilization_window_seconds: i64,
    #[serde(default)]
    pub select_policy: ScalingPolicySelect,
    #[serde(default)]
    pub policies: Vec<ScalingPolicy>,
}

/// Optional per-direction overrides of the controller's built-in rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaBehavior {
    #[serde(default)]
    pub scale_up: Option<ScalingRules>,
    #[serde(default)]
    pub scale_down: Option<ScalingRules>,
}

// --- HPA spec / status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaSpec {
    pub scale_target_ref: CrossVersionObjectReference,
    #[serde(default)]
    pub min_replicas: i32,
    #[serde(default)]
    pub max_replicas: i32,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub behavior: Option<HpaBehavior>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaStatus {
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default)]
    pub desired_replicas: i32,
    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,
}

// --- HorizontalPodAutoscaler ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalPodAutoscaler {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: HpaSpec,
    #[serde(default)]
    pub status: HpaStatus,
}

impl HorizontalPodAutoscaler {
    /// Owner reference pointing at this autoscaler, appended to a ReplicaSet
    /// when replica management is transferred.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: "HorizontalPodAutoscaler".to_string(),
            name: self.metadata.name.clone(),
            api_version: self.type_meta.api_version.clone(),
            uid: self.metadata.uid.clone(),
        }
    }
}
