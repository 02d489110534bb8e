//! Standalone worker server
//!
//! Serves the dispatch protocol and runs each task in a child evaluator
//! process. Configuration comes from `FLOWMILL_WORKER_*` environment
//! variables; the evaluator binary is discovered on PATH when not set
//! explicitly.

use std::sync::Arc;

use flow_worker::runner::{ProcessRunner, TaskRunner};
use flow_worker::server::{router, WorkerState};
use flow_worker::{TaskRegistry, WorkerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = WorkerConfig::from_env();
    std::fs::create_dir_all(&config.cache_dir)?;

    let runner: Arc<dyn TaskRunner> = match &config.evaluator_bin {
        Some(bin) => Arc::new(ProcessRunner::new(bin.clone())),
        None => Arc::new(ProcessRunner::discover()?),
    };

    let state = WorkerState {
        registry: Arc::new(TaskRegistry::new()),
        runner,
    };

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("flow-worker listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
