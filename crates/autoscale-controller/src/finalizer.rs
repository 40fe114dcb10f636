//! Finalizer state machine shared by every workload kind.

use std::future::Future;

use error_stack::Report;
use error_stack::ResultExt;
use kube::Resource;

use crate::error::ReconcileError;
use crate::error::ReconcileResult;
use crate::error::StoreResultExt;
use crate::store::kind_of;
use crate::store::ObjectKey;
use crate::store::ObjectStore;

/// What [`handle_finalizer`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerOutcome {
    /// The finalizer was missing and has been persisted.
    Added,
    /// The finalizer was already in place; nothing written.
    Present,
    /// The object is being deleted: cleanup ran and the finalizer was removed.
    CleanedUp,
    /// The object is being deleted and no longer carries the finalizer.
    Released,
}

impl FinalizerOutcome {
    /// Whether the object is on its way out and nothing else should touch it.
    pub const fn is_deleting(self) -> bool {
        matches!(self, Self::CleanedUp | Self::Released)
    }
}

fn has_finalizer<K: Resource>(object: &K, finalizer: &str) -> bool {
    object
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

/// Adds `finalizer` to a live object, or runs `cleanup` and then removes it
/// from an object being deleted.
///
/// Writes go through `store.replace` and the persisted result is written back
/// into `object`. When cleanup fails the finalizer stays, so the next attempt
/// runs cleanup again.
///
/// # Errors
///
/// - [`ReconcileError::InvalidInput`] if `object` is `None`
/// - [`ReconcileError::CleanupFailed`] if `cleanup` fails
/// - [`ReconcileError::WriteFailed`] / [`ReconcileError::WriteConflict`] if
///   persisting the finalizer change fails
pub async fn handle_finalizer<K, S, F, Fut>(
    store: &S,
    object: Option<&mut K>,
    finalizer: &str,
    cleanup: F,
) -> ReconcileResult<FinalizerOutcome>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
    F: FnOnce(&K) -> Fut,
    Fut: Future<Output = ReconcileResult<()>>,
{
    let Some(object) = object else {
        return Err(Report::new(ReconcileError::invalid_input(format!(
            "no object to apply finalizer {finalizer} to"
        ))));
    };
    let key = ObjectKey::of(object);
    let kind = kind_of::<K>();
    let deleting = object.meta().deletion_timestamp.is_some();

    match (deleting, has_finalizer(object, finalizer)) {
        (false, true) => Ok(FinalizerOutcome::Present),
        (true, false) => Ok(FinalizerOutcome::Released),
        (false, false) => {
            object
                .meta_mut()
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(finalizer.to_string());
            *object = store.replace(object).await.write_context(&kind, &key)?;
            tracing::info!(%key, %kind, finalizer, "added finalizer");
            Ok(FinalizerOutcome::Added)
        }
        (true, true) => {
            cleanup(object)
                .await
                .change_context(ReconcileError::CleanupFailed { key: key.clone() })?;

            if let Some(finalizers) = object.meta_mut().finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
            *object = store.replace(object).await.write_context(&kind, &key)?;
            tracing::info!(%key, %kind, finalizer, "cleanup finished, removed finalizer");
            Ok(FinalizerOutcome::CleanedUp)
        }
    }
}
