use std::sync::Arc;

use anyhow::Result;
use kube::Client;

use crate::app::tasks::Tasks;
use crate::config::RunArgs;
use crate::controller::ControllerContext;
use crate::metrics::ControllerMetrics;
use crate::store::KubeStore;

pub struct Application {
    client: Client,
    context: Arc<ControllerContext<KubeStore>>,
    metrics: ControllerMetrics,
    run_args: RunArgs,
}

impl Application {
    pub fn new(
        client: Client,
        context: Arc<ControllerContext<KubeStore>>,
        metrics: ControllerMetrics,
        run_args: RunArgs,
    ) -> Self {
        Self {
            client,
            context,
            metrics,
            run_args,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn context(&self) -> &Arc<ControllerContext<KubeStore>> {
        &self.context
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    pub fn run_args(&self) -> &RunArgs {
        &self.run_args
    }

    /// Starts every task and waits until shutdown is requested or a task dies.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {e}");
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }

    /// Waits for background syncs that were still in flight.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");
        self.context.reconciler.shutdown().await;
        tracing::info!("Application shutdown completed");
        Ok(())
    }
}
