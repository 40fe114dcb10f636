use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    #[arg(
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file with one or more Deployment, StatefulSet or DaemonSet documents"
    )]
    pub manifest: PathBuf,

    #[arg(
        long,
        help = "Also render VerticalPodAutoscalers",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_vpa: bool,
}
