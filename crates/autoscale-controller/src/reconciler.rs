//! Per-workload control loop.
//!
//! A request names a `(namespace, name)`. The reconciler finds the workload
//! behind it, runs the finalizer lifecycle with autoscaler removal as cleanup
//! and then brings the HPA and VPA in line with the workload's annotations.

use std::sync::Arc;

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::Resource;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use utils::keyed_lock::KeyedAsyncLock;

use crate::annotations::manages_hpa;
use crate::annotations::manages_vpa;
use crate::annotations::AUTOSCALE_FINALIZER;
use crate::autoscaler::hpa::build_desired_hpa;
use crate::autoscaler::remove_autoscaler;
use crate::autoscaler::sync_autoscaler;
use crate::autoscaler::vpa::build_desired_vpa;
use crate::autoscaler::vpa::VerticalPodAutoscaler;
use crate::autoscaler::AutoscalerKind;
use crate::autoscaler::SyncAction;
use crate::error::ReconcileResult;
use crate::finalizer::handle_finalizer;
use crate::finalizer::FinalizerOutcome;
use crate::metrics::ControllerMetrics;
use crate::metrics::UNKNOWN_KIND;
use crate::store::ClusterStore;
use crate::store::ObjectKey;
use crate::store::ObjectStore;
use crate::workload::resolve_workload;
use crate::workload::Workload;
use crate::workload::WorkloadKind;

/// Where the autoscaler sync phase runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SyncMode {
    /// Within the reconcile call; failures surface to the caller.
    #[default]
    Inline,
    /// On a tracked background task; failures are logged and counted.
    Background,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub enable_vpa: bool,
    pub sync_mode: SyncMode,
    pub max_background_syncs: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            enable_vpa: true,
            sync_mode: SyncMode::Inline,
            max_background_syncs: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub horizontal: SyncAction,
    pub vertical: SyncAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing named like the request exists.
    WorkloadMissing,
    /// The workload is being deleted; cleanup is done.
    Finalized { kind: WorkloadKind },
    Synced {
        kind: WorkloadKind,
        report: SyncReport,
    },
    /// The sync phase was handed to a background task.
    Dispatched { kind: WorkloadKind },
}

/// Deletes every autoscaler the controller may have created for `key`.
async fn delete_autoscalers<S>(store: &S, key: &ObjectKey, enable_vpa: bool) -> ReconcileResult<()>
where
    S: ClusterStore + ?Sized,
{
    remove_autoscaler::<HorizontalPodAutoscaler, _>(store, key).await?;
    if enable_vpa {
        remove_autoscaler::<VerticalPodAutoscaler, _>(store, key).await?;
    }
    Ok(())
}

pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    metrics: ControllerMetrics,
    locks: Arc<KeyedAsyncLock<ObjectKey>>,
    pending: Arc<KeyedAsyncLock<ObjectKey>>,
    settings: ReconcilerSettings,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl<S: ?Sized> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
            locks: Arc::clone(&self.locks),
            pending: Arc::clone(&self.pending),
            settings: self.settings,
            tracker: self.tracker.clone(),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<S> Reconciler<S>
where
    S: ClusterStore + ?Sized,
{
    pub fn new(store: Arc<S>, metrics: ControllerMetrics, settings: ReconcilerSettings) -> Self {
        Self {
            store,
            metrics,
            locks: Arc::new(KeyedAsyncLock::new()),
            pending: Arc::new(KeyedAsyncLock::new()),
            settings,
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(settings.max_background_syncs.max(1))),
        }
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Runs one reconciliation attempt for `key`.
    ///
    /// Attempts for the same key never overlap, including background syncs.
    #[tracing::instrument(skip_all, fields(%key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<ReconcileOutcome> {
        let _guard = self.locks.lock(key).await;

        let Some(mut workload) = resolve_workload(&*self.store, key).await? else {
            self.metrics.record_reconcile(UNKNOWN_KIND);
            tracing::debug!("no matching workload");
            return Ok(ReconcileOutcome::WorkloadMissing);
        };
        let kind = workload.kind();
        self.metrics.record_reconcile(kind.as_str());

        let lifecycle = self.run_lifecycle(&mut workload).await?;
        if lifecycle.is_deleting() {
            return Ok(ReconcileOutcome::Finalized { kind });
        }

        match self.settings.sync_mode {
            SyncMode::Inline => {
                let report = self.sync_autoscalers(&workload).await?;
                Ok(ReconcileOutcome::Synced { kind, report })
            }
            SyncMode::Background => {
                self.dispatch(key.clone());
                Ok(ReconcileOutcome::Dispatched { kind })
            }
        }
    }

    async fn run_lifecycle(&self, workload: &mut Workload) -> ReconcileResult<FinalizerOutcome> {
        let key = workload.key();
        match workload {
            Workload::Deployment(object) => self.finalize(object, key).await,
            Workload::StatefulSet(object) => self.finalize(object, key).await,
            Workload::DaemonSet(object) => self.finalize(object, key).await,
        }
    }

    async fn finalize<K>(&self, object: &mut K, key: ObjectKey) -> ReconcileResult<FinalizerOutcome>
    where
        K: Resource<DynamicType = ()> + Send + Sync + 'static,
        S: ObjectStore<K>,
    {
        let store = Arc::clone(&self.store);
        let enable_vpa = self.settings.enable_vpa;
        handle_finalizer(
            &*self.store,
            Some(object),
            AUTOSCALE_FINALIZER,
            move |_| async move { delete_autoscalers(&*store, &key, enable_vpa).await },
        )
        .await
    }

    /// Brings the HPA in line with the workload's `hpa.` annotations.
    pub async fn sync_horizontal(&self, workload: &Workload) -> ReconcileResult<SyncAction> {
        if manages_hpa(&workload.annotations()) {
            sync_autoscaler(&*self.store, workload, build_desired_hpa(workload)).await
        } else {
            remove_autoscaler::<HorizontalPodAutoscaler, _>(&*self.store, &workload.key()).await
        }
    }

    /// Brings the VPA in line with the workload's `vpa.` annotations.
    pub async fn sync_vertical(&self, workload: &Workload) -> ReconcileResult<SyncAction> {
        if !self.settings.enable_vpa {
            return Ok(SyncAction::Skipped);
        }
        if manages_vpa(&workload.annotations()) {
            let desired = build_desired_vpa(workload)?;
            sync_autoscaler(&*self.store, workload, desired).await
        } else {
            remove_autoscaler::<VerticalPodAutoscaler, _>(&*self.store, &workload.key()).await
        }
    }

    /// Horizontal first, then vertical; a vertical failure leaves the
    /// horizontal result in place.
    pub async fn sync_autoscalers(&self, workload: &Workload) -> ReconcileResult<SyncReport> {
        let horizontal = self.sync_horizontal(workload).await?;
        let vertical = self.sync_vertical(workload).await?;
        Ok(SyncReport {
            horizontal,
            vertical,
        })
    }

    /// Queues a background sync for `key` unless one is already waiting.
    ///
    /// A queued task holds its `pending` entry until it owns both the key and
    /// a permit, so each key has at most one waiting task next to the running
    /// one.
    fn dispatch(&self, key: ObjectKey) {
        let Some(pending) = self.pending.try_lock(&key) else {
            tracing::debug!(%key, "background sync already queued");
            return;
        };
        let this = self.clone();
        let span = tracing::info_span!("background_sync", %key);
        self.tracker.spawn(
            async move {
                let _guard = this.locks.lock(&key).await;
                let Ok(_permit) = Arc::clone(&this.permits).acquire_owned().await else {
                    return;
                };
                drop(pending);
                this.background_sync(&key).await;
            }
            .instrument(span),
        );
    }

    /// Re-reads the workload and syncs both autoscalers. Never touches the
    /// finalizer and never retries; the next requeue picks up failures.
    async fn background_sync(&self, key: &ObjectKey) {
        let workload = match resolve_workload(&*self.store, key).await {
            Ok(Some(workload)) if !workload.is_deleting() => workload,
            Ok(_) => {
                tracing::debug!("workload gone or deleting, skipping sync");
                return;
            }
            Err(report) => {
                tracing::warn!("failed to resolve workload: {report:?}");
                self.metrics.record_sync_failure(AutoscalerKind::Horizontal);
                return;
            }
        };

        if let Err(report) = self.sync_horizontal(&workload).await {
            tracing::warn!("horizontal sync failed: {report:?}");
            self.metrics.record_sync_failure(AutoscalerKind::Horizontal);
        }
        if let Err(report) = self.sync_vertical(&workload).await {
            tracing::warn!("vertical sync failed: {report:?}");
            self.metrics.record_sync_failure(AutoscalerKind::Vertical);
        }
    }

    /// Stops accepting background work and waits for running syncs.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
