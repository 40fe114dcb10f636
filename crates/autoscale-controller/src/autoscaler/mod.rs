//! Desired-state builders, comparators and the create/replace/delete sync
//! shared by both autoscaler kinds.

pub mod hpa;
pub mod vpa;

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::NamespaceResourceScope;
use kube::Resource;

use crate::error::ReconcileError;
use crate::error::ReconcileResult;
use crate::error::StoreResultExt;
use crate::store::delete_if_present;
use crate::store::kind_of;
use crate::store::ObjectKey;
use crate::store::ObjectStore;
use crate::workload::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoscalerKind {
    Horizontal,
    Vertical,
}

impl AutoscalerKind {
    /// Label value used in metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Horizontal => "hpa",
            Self::Vertical => "vpa",
        }
    }
}

impl fmt::Display for AutoscalerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An autoscaler resource the controller owns on behalf of a workload.
pub trait ManagedAutoscaler:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + Send + Sync + 'static
{
    const KIND: AutoscalerKind;

    /// Whether `self` already satisfies `desired`; `false` triggers a replace.
    fn matches(&self, desired: &Self) -> bool;

    /// Moves the desired spec into `self`, leaving other fields untouched.
    fn adopt_spec(&mut self, desired: Self);
}

/// What a sync step did to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Absent,
    /// Management of this kind is turned off in configuration.
    Skipped,
}

/// Metadata for a desired autoscaler: same name and namespace as the workload.
pub(crate) fn desired_metadata(workload: &Workload) -> ObjectMeta {
    let key = workload.key();
    ObjectMeta {
        name: Some(key.name),
        namespace: Some(key.namespace),
        ..Default::default()
    }
}

/// Makes `owner` the controller of `meta`, refusing if another object already
/// controls it.
fn set_controller_reference(meta: &mut ObjectMeta, owner: OwnerReference) -> ReconcileResult<()> {
    let references = meta.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(ReconcileError::invalid_configuration(format!(
            "already controlled by {} {}",
            other.kind, other.name
        ))
        .into());
    }
    references.retain(|r| r.uid != owner.uid);
    references.push(owner);
    Ok(())
}

/// Creates or replaces the autoscaler for `workload` so it matches `desired`.
///
/// Nothing is written when the current object already matches.
pub async fn sync_autoscaler<A, S>(
    store: &S,
    workload: &Workload,
    mut desired: A,
) -> ReconcileResult<SyncAction>
where
    A: ManagedAutoscaler,
    S: ObjectStore<A> + ?Sized,
{
    let key = workload.key();
    let kind = kind_of::<A>();

    let Some(mut current) = store.get(&key).await.read_context(&kind, &key)? else {
        set_controller_reference(desired.meta_mut(), workload.controller_reference())?;
        store.create(&desired).await.write_context(&kind, &key)?;
        tracing::info!(%key, %kind, "created autoscaler");
        return Ok(SyncAction::Created);
    };

    if current.matches(&desired) {
        tracing::debug!(%key, %kind, "autoscaler up to date");
        return Ok(SyncAction::Unchanged);
    }

    current.adopt_spec(desired);
    set_controller_reference(current.meta_mut(), workload.controller_reference())?;
    store.replace(&current).await.write_context(&kind, &key)?;
    tracing::info!(%key, %kind, "updated autoscaler");
    Ok(SyncAction::Updated)
}

/// Deletes the autoscaler named `key` if it exists.
pub async fn remove_autoscaler<A, S>(store: &S, key: &ObjectKey) -> ReconcileResult<SyncAction>
where
    A: ManagedAutoscaler,
    S: ObjectStore<A> + ?Sized,
{
    let kind = kind_of::<A>();
    if delete_if_present::<A, _>(store, key)
        .await
        .write_context(&kind, key)?
    {
        tracing::info!(%key, %kind, "deleted autoscaler");
        Ok(SyncAction::Deleted)
    } else {
        Ok(SyncAction::Absent)
    }
}
