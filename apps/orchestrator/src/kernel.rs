// [apps/orchestrator/src/kernel.rs]
//! Composition root. Builds `AppState` (Store, LifecycleManager,
//! CommandBus, Scheduler, AttestationScheduler, ReputationEngine) from
//! config, then spawns every background reconciliation loop and serves
//! the HTTP router. `main.rs` reduces to reading env and igniting one of
//! these.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::{error, info, instrument};

use crate::config::OrchestratorConfig;
use crate::routes::build_router;
use crate::state::AppState;

pub struct OrchestratorKernel {
    port: u16,
    state: AppState,
}

impl OrchestratorKernel {
    /// Wires every component from `config`. No I/O happens here —
    /// background loops and the HTTP listener only start once
    /// [`Self::run`] is called.
    #[instrument(skip_all, fields(port))]
    pub fn ignite(config: OrchestratorConfig, port: u16) -> Self {
        info!(port, "orchestrator kernel assembled");
        Self { port, state: AppState::new(config) }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Spawns the health monitor, attestation scheduler, reputation
    /// engine, and cleanup loop, then binds and serves the HTTP router.
    /// Runs until the process is killed or the listener errors.
    pub async fn run(self) -> anyhow::Result<()> {
        self.state.spawn_background_loops();

        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port);
        let router = build_router(self.state);

        info!(%address, "orchestrator listening");
        let listener = tokio::net::TcpListener::bind(address).await?;

        if let Err(err) = axum::serve(listener, router).await {
            error!(error = %err, "http server exited with an error");
            return Err(err.into());
        }
        Ok(())
    }
}
