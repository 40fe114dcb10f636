use std::fmt;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use crate::annotations::Annotations;
use crate::error::ReconcileResult;
use crate::error::StoreResultExt;
use crate::store::kind_of;
use crate::store::ClusterStore;
use crate::store::ObjectKey;
use crate::store::ObjectStore;

/// API version shared by every supported workload kind.
pub const APPS_API_VERSION: &str = "apps/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    /// Probe order used when resolving a request.
    pub const ALL: [WorkloadKind; 3] = [Self::Deployment, Self::StatefulSet, Self::DaemonSet];

    /// Kind named by a manifest's `kind` field, if it is a supported one.
    pub fn from_kind_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload the controller can attach autoscalers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(object) => object.meta(),
            Self::StatefulSet(object) => object.meta(),
            Self::DaemonSet(object) => object.meta(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Deployment(object) => ObjectKey::of(object),
            Self::StatefulSet(object) => ObjectKey::of(object),
            Self::DaemonSet(object) => ObjectKey::of(object),
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn annotations(&self) -> Annotations {
        self.meta().annotations.clone().unwrap_or_default()
    }

    pub fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Controller owner reference that makes dependents garbage-collectable
    /// together with this workload.
    pub fn controller_reference(&self) -> OwnerReference {
        let meta = self.meta();
        OwnerReference {
            api_version: APPS_API_VERSION.to_string(),
            kind: self.kind().to_string(),
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

impl From<Deployment> for Workload {
    fn from(object: Deployment) -> Self {
        Self::Deployment(object)
    }
}

impl From<StatefulSet> for Workload {
    fn from(object: StatefulSet) -> Self {
        Self::StatefulSet(object)
    }
}

impl From<DaemonSet> for Workload {
    fn from(object: DaemonSet) -> Self {
        Self::DaemonSet(object)
    }
}

async fn probe<K, S>(store: &S, key: &ObjectKey) -> ReconcileResult<Option<K>>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    store.get(key).await.read_context(&kind_of::<K>(), key)
}

/// Finds the workload behind `key`, whatever its kind.
///
/// All kinds are probed concurrently; if several match, the first in
/// [`WorkloadKind::ALL`] order wins. `Ok(None)` means no workload exists.
pub async fn resolve_workload<S>(store: &S, key: &ObjectKey) -> ReconcileResult<Option<Workload>>
where
    S: ClusterStore + ?Sized,
{
    let (deployment, stateful_set, daemon_set) = futures::try_join!(
        probe::<Deployment, _>(store, key),
        probe::<StatefulSet, _>(store, key),
        probe::<DaemonSet, _>(store, key),
    )?;

    Ok(deployment
        .map(Workload::from)
        .or_else(|| stateful_set.map(Workload::from))
        .or_else(|| daemon_set.map(Workload::from)))
}
