use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;

use crate::app::Application;
use crate::config::RunArgs;
use crate::controller::ControllerContext;
use crate::kube_client::init_kube_client;
use crate::metrics::ControllerMetrics;
use crate::reconciler::Reconciler;
use crate::reconciler::ReconcilerSettings;
use crate::store::KubeStore;

pub struct ApplicationBuilder {
    run_args: RunArgs,
}

impl ApplicationBuilder {
    pub fn new(run_args: RunArgs) -> Self {
        Self { run_args }
    }

    /// Connects to the cluster and assembles the reconciler.
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let client = init_kube_client(self.run_args.kubeconfig.as_deref())
            .await
            .map_err(|report| anyhow::anyhow!("{report:?}"))
            .context("failed to initialize Kubernetes client")?;

        let metrics = ControllerMetrics::new()
            .map_err(|report| anyhow::anyhow!("{report:?}"))
            .context("failed to register controller metrics")?;

        let settings = ReconcilerSettings::from(&self.run_args);
        tracing::info!(
            enable_vpa = settings.enable_vpa,
            sync_mode = ?settings.sync_mode,
            namespace = self.run_args.namespace.as_deref().unwrap_or("<all>"),
            "reconciler configured"
        );
        let store = Arc::new(KubeStore::new(client.clone()));
        let context = Arc::new(ControllerContext {
            reconciler: Reconciler::new(store, metrics.clone(), settings),
            requeue_after: self.run_args.requeue_after(),
        });

        Ok(Application::new(client, context, metrics, self.run_args))
    }
}
