//! One orchestration cycle: match systems with pending locations to agents,
//! register agents where none exist, and run one worker per system.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::ServiceContext;
use crate::remote::ClientError;
use crate::storage::{Agent, LocationRecord};
use crate::worker::{Navigator, RunOutcome, WorkerError};

/// Tally of one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub registered: usize,
    pub completed: usize,
    pub suspended: usize,
    pub failed: usize,
    /// Agents with nothing left to chart; no worker started.
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &Result<RunOutcome, WorkerError>) {
        match outcome {
            Ok(RunOutcome::Completed) => self.completed += 1,
            Ok(RunOutcome::Suspended(_)) => self.suspended += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Orchestrator {
    ctx: Arc<ServiceContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Run cycles until the process is terminated. A failed cycle is logged
    /// and the next one starts after the usual delay.
    pub async fn run_forever(&self) -> Result<()> {
        let delay = self.ctx.config.orchestrator.cycle_delay();
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %format!("{:#}", e), "orchestration cycle failed");
            }
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cfg = &self.ctx.config.orchestrator;
        let store = &self.ctx.store;
        let mut report = CycleReport::default();

        let mut pending: BTreeMap<String, Vec<LocationRecord>> = BTreeMap::new();
        for location in store.list_locations().context("Failed to load locations")? {
            if location.needs_work() {
                pending.entry(location.system.clone()).or_default().push(location);
            }
        }

        let mut agents: HashMap<String, Agent> = HashMap::new();
        for mut agent in store.list_agents().context("Failed to load agents")? {
            if !pending.contains_key(&agent.system) {
                if !agent.completed {
                    store.set_agent_completed(&agent.id, true)?;
                    info!(agent = %agent.id, system = %agent.system, "nothing left to chart, marked completed");
                }
                report.skipped += 1;
                continue;
            }
            if agents.contains_key(&agent.system) {
                warn!(agent = %agent.id, system = %agent.system, "system already has an agent, ignoring");
                continue;
            }
            if agent.completed {
                store.set_agent_completed(&agent.id, false)?;
                agent.completed = false;
                if agent.arrival.take().is_some() {
                    store.set_agent_arrival(&agent.id, None)?;
                }
                info!(agent = %agent.id, system = %agent.system, "new work found, reopening agent");
            }
            agents.insert(agent.system.clone(), agent);
        }

        let order = self.service_order(&pending)?;
        info!(systems = order.len(), agents = agents.len(), "starting cycle");

        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_workers.max(1)));
        let mut workers = JoinSet::new();
        let mut label = 0;

        for (system, faction) in order {
            let agent = match agents.remove(&system) {
                Some(agent) => agent,
                None => match self.register_for(&system, faction.as_deref()).await {
                    Ok(agent) => {
                        report.registered += 1;
                        tokio::time::sleep(cfg.registration_delay()).await;
                        agent
                    }
                    Err(e) => {
                        error!(%system, error = %format!("{:#}", e), "registration failed");
                        report.failed += 1;
                        continue;
                    }
                },
            };

            label += 1;
            let backlog = pending.remove(&system).unwrap_or_default();
            let mut navigator = Navigator::new(self.ctx.clone(), agent, label);
            navigator.assign(backlog);

            let permits = permits.clone();
            workers.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await;
                let id = navigator.agent().id.clone();
                (id, navigator.run().await)
            });
        }

        let poll = cfg.poll_interval();
        while !workers.is_empty() {
            match tokio::time::timeout(poll, workers.join_next()).await {
                Ok(Some(Ok((agent, outcome)))) => {
                    match &outcome {
                        Ok(RunOutcome::Completed) => info!(%agent, "worker completed"),
                        Ok(RunOutcome::Suspended(reason)) => info!(%agent, ?reason, "worker suspended"),
                        Err(e) => error!(%agent, error = %e, "worker failed"),
                    }
                    report.record(&outcome);
                }
                Ok(Some(Err(e))) => {
                    error!(error = %e, "worker task panicked");
                    report.failed += 1;
                }
                Ok(None) => break,
                Err(_) => info!(running = workers.len(), "workers still running"),
            }
        }

        info!(
            registered = report.registered,
            completed = report.completed,
            suspended = report.suspended,
            failed = report.failed,
            skipped = report.skipped,
            "cycle finished"
        );
        Ok(report)
    }

    /// Systems with pending work, farthest from their faction first.
    /// Systems without a distance follow, by name.
    fn service_order(
        &self,
        pending: &BTreeMap<String, Vec<LocationRecord>>,
    ) -> Result<Vec<(String, Option<String>)>> {
        let mut order = Vec::with_capacity(pending.len());
        let mut seen = HashSet::new();

        for system in self.ctx.store.list_systems_by_distance()? {
            if pending.contains_key(&system.symbol) && seen.insert(system.symbol.clone()) {
                order.push((system.symbol, system.closest_faction));
            }
        }
        for system in pending.keys() {
            if !seen.contains(system) {
                order.push((system.clone(), None));
            }
        }
        Ok(order)
    }

    /// Register `{prefix}-{system}`, retrying once under the fallback
    /// prefix when the remote refuses the first name.
    async fn register_for(&self, system: &str, faction: Option<&str>) -> Result<Agent> {
        let cfg = &self.ctx.config.orchestrator;
        let faction = faction.unwrap_or(cfg.default_faction.as_str());
        let client = &self.ctx.client;

        let primary = format!("{}-{}", cfg.agent_prefix, system);
        let (id, token) = match client.register(&primary, faction).await {
            Ok(token) => (primary, token),
            Err(ClientError::Api(e)) => {
                let fallback = format!("{}-{}", cfg.fallback_agent_prefix, system);
                warn!(agent = %primary, code = e.code, message = %e.message, %fallback, "registration refused, trying fallback name");
                let token = client
                    .register(&fallback, faction)
                    .await
                    .with_context(|| format!("Failed to register {}", fallback))?;
                (fallback, token)
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to register {}", primary)),
        };

        let agent = Agent::new(id, token, system);
        self.ctx.store.insert_agent(&agent)?;
        info!(agent = %agent.id, %system, %faction, "registered agent");
        Ok(agent)
    }
}
