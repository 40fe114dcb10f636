use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::render::RenderArgs;
use crate::config::run::RunArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the autoscaler controller against a cluster
    Run(Box<RunArgs>),
    /// Print the autoscalers a workload manifest would get
    Render(RenderArgs),
}
