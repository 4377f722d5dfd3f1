use tekton_operator::controllers::{self, State};
use tekton_operator::util::telemetry;
use tracing::info;

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    // Initialize Kubernetes controller state
    let state = State::default();
    let operator = controllers::run(state.clone());
    info!("serving diagnostics on 0.0.0.0:8080");

    // Both runtimes implements graceful shutdown, so poll until both are done
    let (controllers, server) = tokio::join!(operator, server::start_server(state));
    controllers?;
    server?;
    Ok(())
}
