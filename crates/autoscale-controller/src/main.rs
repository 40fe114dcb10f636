use anyhow::Result;
use autoscale_controller::cmd;
use autoscale_controller::config::Cli;
use autoscale_controller::config::Commands;
use clap::Parser;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => cmd::run::run(*run_args).await,
        Commands::Render(render_args) => {
            let _guard = utils::logging::init(None::<&std::path::Path>)?;
            cmd::render::run(&render_args).map_err(|report| anyhow::anyhow!("{report:?}"))
        }
    }
}
