// [apps/orchestrator/src/main.rs]
//! Binary entry point: load `.env`, initialize structured logging, read
//! the listening port and every `OrchestratorConfig` tunable from the
//! environment, then ignite and run the kernel.

use orchestrator::prelude::*;
use tracing::info;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    orchestrator_telemetry::init_tracing("orchestrator");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async {
        let port: u16 = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3000);
        let config = OrchestratorConfig::from_env();

        info!(port, "orchestrator starting");
        let kernel = OrchestratorKernel::ignite(config, port);
        kernel.run().await
    })
}
