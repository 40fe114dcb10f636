use std::fmt::Debug;
use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::controller::run_controller;
use crate::metrics::MetricsServer;
use crate::store::KubeStore;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves once `ctrl_c` reports the signal. A failed registration never
/// resolves, so it cannot be mistaken for a shutdown request.
#[cfg(any(not(unix), test))]
async fn wait_for_ctrl_c<F>(ctrl_c: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = ctrl_c.await {
        tracing::error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
}

/// Task manager, responsible for starting and stopping the long-running tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Starts the metrics server and one controller per workload kind.
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let server = MetricsServer::new(
            app.metrics().clone(),
            app.run_args().metrics_listen_addr.clone(),
        );
        let mark_ready = server.ready_handle();
        let token = self.cancellation_token.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(report) = server.run(token).await {
                tracing::error!("metrics server failed: {report:?}");
            }
        }));

        self.tasks.push(Self::spawn_controller::<Deployment>(app));
        self.tasks.push(Self::spawn_controller::<StatefulSet>(app));
        self.tasks.push(Self::spawn_controller::<DaemonSet>(app));

        mark_ready();
    }

    fn spawn_controller<K>(app: &Application) -> JoinHandle<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
    {
        let client = app.client().clone();
        let namespace = app.run_args().namespace.clone();
        let watch_vpa = app.run_args().enable_vpa;
        let context = app.context().clone();
        tokio::spawn(run_controller::<K, KubeStore>(
            client, namespace, watch_vpa, context,
        ))
    }

    /// Waits for a shutdown signal, or for any task to exit on its own.
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::signal;
                use tokio::signal::unix::SignalKind;
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(wait_for_ctrl_c(tokio::signal::ctrl_c()))
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {timeout:?}");
        });
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn ctrl_c_registration_failure_does_not_shut_down() {
        let failed = wait_for_ctrl_c(async { Err(io::Error::other("no console")) });

        let result = tokio::time::timeout(Duration::from_millis(50), failed).await;

        assert!(result.is_err());
    }

    #[test(tokio::test)]
    async fn ctrl_c_signal_requests_shutdown() {
        let received = wait_for_ctrl_c(async { Ok(()) });

        let result = tokio::time::timeout(Duration::from_millis(50), received).await;

        assert!(result.is_ok());
    }
}
