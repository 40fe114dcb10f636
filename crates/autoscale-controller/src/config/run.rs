use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::reconciler::ReconcilerSettings;
use crate::reconciler::SyncMode;

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "WATCH_NAMESPACE",
        help = "Namespace to watch (empty for all namespaces)"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        default_value_t = 3,
        help = "Seconds before every workload is reconciled again"
    )]
    pub requeue_interval_secs: u64,

    #[arg(
        long,
        env = "METRICS_LISTEN_ADDR",
        default_value = "0.0.0.0:8080",
        help = "Listen address for /metrics, /healthz and /readyz"
    )]
    pub metrics_listen_addr: String,

    #[arg(
        long,
        help = "Manage VerticalPodAutoscalers (requires the VPA CRDs)",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_vpa: bool,

    #[arg(
        long,
        value_enum,
        default_value_t = SyncMode::Inline,
        help = "Sync autoscalers inside the reconcile call or on background tasks"
    )]
    pub sync_mode: SyncMode,

    #[arg(
        long,
        default_value_t = 16,
        help = "Upper bound on concurrently running background syncs"
    )]
    pub max_background_syncs: usize,

    #[arg(
        long,
        env = utils::logging::LOG_PATH_ENV_VAR,
        value_hint = clap::ValueHint::FilePath,
        help = "Write logs to a daily rolling file instead of stderr"
    )]
    pub log_path: Option<PathBuf>,
}

impl RunArgs {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }
}

impl From<&RunArgs> for ReconcilerSettings {
    fn from(args: &RunArgs) -> Self {
        Self {
            enable_vpa: args.enable_vpa,
            sync_mode: args.sync_mode,
            max_background_syncs: args.max_background_syncs.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn parse(args: &[&str]) -> RunArgs {
        RunArgs::try_parse_from(std::iter::once("run").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn settings_follow_flags() {
        let args = parse(&[
            "--enable-vpa",
            "false",
            "--sync-mode",
            "background",
            "--max-background-syncs",
            "0",
            "--requeue-interval-secs",
            "10",
        ]);

        let settings = ReconcilerSettings::from(&args);

        assert!(!settings.enable_vpa);
        assert_eq!(settings.sync_mode, SyncMode::Background);
        assert_eq!(settings.max_background_syncs, 1);
        assert_eq!(args.requeue_after(), Duration::from_secs(10));
    }
}
