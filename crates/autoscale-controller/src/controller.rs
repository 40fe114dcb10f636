//! Glue between kube-rs controllers and the [`Reconciler`].
//!
//! One controller runs per workload kind. Each watches its workloads plus the
//! HPAs (and VPAs) they own and funnels every event into the same reconciler.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::core::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::warn;

use crate::autoscaler::vpa::VerticalPodAutoscaler;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::kind_of;
use crate::store::ClusterStore;
use crate::store::ObjectKey;

pub struct ControllerContext<S: ?Sized> {
    pub reconciler: Reconciler<S>,
    /// Delay before every object is looked at again, whatever the outcome.
    pub requeue_after: Duration,
}

/// Reconciles the workload behind `object` and schedules the next pass.
pub async fn reconcile_object<K, S>(
    object: Arc<K>,
    ctx: Arc<ControllerContext<S>>,
) -> Result<Action, ControllerError>
where
    K: Resource,
    S: ClusterStore + ?Sized,
{
    let key = ObjectKey::of(object.as_ref());
    let outcome = ctx.reconciler.reconcile(&key).await?;
    debug!(%key, ?outcome, "reconciled");
    Ok(Action::requeue(ctx.requeue_after))
}

pub fn error_policy<K, S>(
    object: Arc<K>,
    error: &ControllerError,
    ctx: Arc<ControllerContext<S>>,
) -> Action
where
    K: Resource,
    S: ?Sized,
{
    warn!(key = %ObjectKey::of(object.as_ref()), "reconciliation failed: {error}");
    Action::requeue(ctx.requeue_after)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Runs the controller for workload kind `K` until a shutdown signal arrives.
pub async fn run_controller<K, S>(
    client: Client,
    namespace: Option<String>,
    watch_vpa: bool,
    ctx: Arc<ControllerContext<S>>,
) where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    S: ClusterStore,
{
    let kind = kind_of::<K>();
    let namespace = namespace.as_deref();
    let mut controller = Controller::new(api::<K>(&client, namespace), watcher::Config::default())
        .owns(
            api::<HorizontalPodAutoscaler>(&client, namespace),
            watcher::Config::default(),
        );
    if watch_vpa {
        controller = controller.owns(
            api::<VerticalPodAutoscaler>(&client, namespace),
            watcher::Config::default(),
        );
    }

    tracing::info!(%kind, "starting controller");
    controller
        .shutdown_on_signal()
        .run(reconcile_object::<K, S>, error_policy::<K, S>, ctx)
        .for_each(|result| {
            match result {
                Ok((object, action)) => debug!(object = %object.name, ?action, "reconcile finished"),
                Err(error) => warn!(%kind, "controller error: {error}"),
            }
            futures::future::ready(())
        })
        .await;
    tracing::info!(%kind, "controller stopped");
}
