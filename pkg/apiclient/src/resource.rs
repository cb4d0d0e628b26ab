use serde::Serialize;
use serde::de::DeserializeOwned;

use pkg_types::hpa::HorizontalPodAutoscaler;
use pkg_types::pod::Pod;
use pkg_types::replicaset::ReplicaSet;

/// Capability a resource kind exposes to the informer framework: how it is
/// named on the wire and how its cache key (the UID) is read and assigned.
/// One generic Informer is instantiated per implementing kind.
pub trait Resource:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind name as it appears in owner references and logs.
    const KIND: &'static str;
    /// URL collection segment under `/api/v1/`.
    const PATH: &'static str;

    fn uid(&self) -> &str;
    fn set_uid(&mut self, uid: String);
}

impl Resource for Pod {
    const KIND: &'static str = "Pod";
    const PATH: &'static str = "pods";

    fn uid(&self) -> &str {
        &self.metadata.uid
    }

    fn set_uid(&mut self, uid: String) {
        self.metadata.uid = uid;
    }
}

impl Resource for ReplicaSet {
    const KIND: &'static str = "ReplicaSet";
    const PATH: &'static str = "replicasets";

    fn uid(&self) -> &str {
        &self.metadata.uid
    }

    fn set_uid(&mut self, uid: String) {
        self.metadata.uid = uid;
    }
}

impl Resource for HorizontalPodAutoscaler {
    const KIND: &'static str = "HorizontalPodAutoscaler";
    const PATH: &'static str = "horizontalpodautoscalers";

    fn uid(&self) -> &str {
        &self.metadata.uid
    }

    fn set_uid(&mut self, uid: String) {
        self.metadata.uid = uid;
    }
}
