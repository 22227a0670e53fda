//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::OrchestratorResult;

pub fn init_tracing() -> OrchestratorResult<()> {
    init_tracing_with_level("info")
}

pub fn init_tracing_with_level(level: &str) -> OrchestratorResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("agent_core_orchestrator={level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(level, "tracing initialized");
    Ok(())
}
