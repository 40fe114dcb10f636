use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KubeClientError {
    #[error("failed to read kubeconfig {path}")]
    ReadKubeconfig { path: String },
    #[error("failed to build client configuration")]
    Configure,
    #[error("failed to create Kubernetes client")]
    Connect,
}

/// Builds a client from `kubeconfig`, or from the in-cluster / default config
/// when no path is given.
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<KubeClientError>> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .change_context(KubeClientError::Connect);
    };

    let kubeconfig = Kubeconfig::read_from(path).change_context_lazy(|| {
        KubeClientError::ReadKubeconfig {
            path: path.display().to_string(),
        }
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(KubeClientError::Configure)
        .attach_printable_lazy(|| format!("kubeconfig: {}", path.display()))?;

    Client::try_from(config).change_context(KubeClientError::Connect)
}
