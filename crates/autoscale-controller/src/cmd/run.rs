use anyhow::Context;
use anyhow::Result;
use utils::logging;
use utils::version::VERSION;

use crate::app::ApplicationBuilder;
use crate::config::RunArgs;

pub async fn run(run_args: RunArgs) -> Result<()> {
    let _guard =
        logging::init(run_args.log_path.as_ref()).context("failed to initialize logging")?;

    tracing::info!("Starting autoscale-controller {}", &**VERSION);

    let app = ApplicationBuilder::new(run_args).build().await?;
    app.run().await?;
    app.shutdown().await?;

    Ok(())
}
