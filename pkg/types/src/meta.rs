use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Type metadata ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub api_version: String,
}

// --- Object metadata ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Unique identifier, assigned by the API on create.
    #[serde(default)]
    pub uid: String,
    /// Labels for selector-based matching
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Parents of this object. A child may carry multiple owner references;
    /// "children of X" is always computed by scanning all children.
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

// --- Owner reference ---

/// A directed edge from a child resource to a parent. There is no reverse
/// index; lookups scan the children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub api_version: String,
    pub uid: String,
}

/// Position of the owner reference with the given UID, or `None`.
pub fn find_owner(refs: &[OwnerReference], uid: &str) -> Option<usize> {
    refs.iter().position(|r| r.uid == uid)
}

// --- Label selector ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: HashMap<String, String>,
}

impl LabelSelector {
    /// Every selector key must be present in `labels` with an equal value.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}
