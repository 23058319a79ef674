//! starcharter -- Automated waypoint charting across many agents.
//!
//! This crate provides a rate-limited priority dispatcher for the remote
//! service, a per-agent navigation worker, SQLite-backed progress tracking,
//! and the orchestrator that ties them together.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod orchestrator;
pub mod remote;
pub mod storage;
pub mod worker;

use anyhow::Result;

use crate::config::Config;
use crate::context::ServiceContext;
use crate::dispatch::{CallStats, Priority};
use crate::orchestrator::Orchestrator;
use crate::remote::ApiRequest;

/// Run the orchestrator: one cycle when `once`, otherwise forever.
pub async fn run(config: Config, once: bool) -> Result<()> {
    tracing::info!(db_path = %config.storage.db_path, base_url = %config.api.base_url, "Starting starcharter");
    let ctx = ServiceContext::from_config(config)?;
    let orchestrator = Orchestrator::new(ctx);

    if once {
        orchestrator.run_cycle().await?;
        Ok(())
    } else {
        orchestrator.run_forever().await
    }
}

/// Measure the achievable call rate: reset the pacing counters, issue
/// `requests` status calls back to back, and return the counters.
pub async fn pace(ctx: &ServiceContext, requests: u32) -> Result<CallStats> {
    let dispatcher = ctx.dispatcher();
    dispatcher.metrics().reset_pacing();

    for i in 1..=requests {
        dispatcher
            .submit(ApiRequest::get(""), Priority::Normal)
            .await?;
        tracing::debug!(issued = i, "status call");
    }

    Ok(dispatcher.metrics().since_pacing_reset())
}
