//! Access to the cluster resource store.
//!
//! The reconciler never talks to `kube::Api` directly. It goes through
//! [`ObjectStore`], implemented by [`KubeStore`] for a live cluster and by
//! `MemoryStore` in tests.

mod kube_store;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::Resource;
use kube::ResourceExt;
use thiserror::Error;

use crate::autoscaler::vpa::VerticalPodAutoscaler;

pub use self::kube_store::KubeStore;

/// Namespace and name of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{namespace}/{name}")]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object. Objects without a namespace map to the empty one.
    pub fn of<K: Resource>(object: &K) -> Self {
        Self {
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
        }
    }
}

/// Failures reported by the resource store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },
    #[error("conflicting write to {kind} {key}")]
    Conflict { kind: String, key: ObjectKey },
    #[error("request for {kind} {key} failed: {message}")]
    Api {
        kind: String,
        key: ObjectKey,
        message: String,
    },
}

pub type StoreResult<T> = Result<T, Report<StoreError>>;

/// Checks whether a store report was caused by a missing object.
pub fn is_not_found(report: &Report<StoreError>) -> bool {
    matches!(report.current_context(), StoreError::NotFound { .. })
}

/// Get/create/replace/delete for one namespaced resource type.
///
/// `replace` carries the object's `resourceVersion`; a stale version fails with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>>;

    async fn create(&self, object: &K) -> StoreResult<K>;

    async fn replace(&self, object: &K) -> StoreResult<K>;

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()>;
}

/// Every resource type the controller reads or writes.
pub trait ClusterStore:
    ObjectStore<Deployment>
    + ObjectStore<StatefulSet>
    + ObjectStore<DaemonSet>
    + ObjectStore<HorizontalPodAutoscaler>
    + ObjectStore<VerticalPodAutoscaler>
    + 'static
{
}

impl<T> ClusterStore for T where
    T: ObjectStore<Deployment>
        + ObjectStore<StatefulSet>
        + ObjectStore<DaemonSet>
        + ObjectStore<HorizontalPodAutoscaler>
        + ObjectStore<VerticalPodAutoscaler>
        + 'static
{
}

/// Deletes `key`, treating an already missing object as success.
///
/// Returns whether an object was actually removed.
pub async fn delete_if_present<K, S>(store: &S, key: &ObjectKey) -> StoreResult<bool>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    match store.delete(key).await {
        Ok(()) => Ok(true),
        Err(report) if is_not_found(&report) => Ok(false),
        Err(report) => Err(report),
    }
}

/// Kind label of a resource type, used in errors and logs.
pub(crate) fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}
