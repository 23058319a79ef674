//! Per-agent navigation worker.
//!
//! A [`Navigator`] drives one agent through the uncharted locations of its
//! home system: depart, wait for arrival, chart, record facilities, move on,
//! then re-verify the whole system against the remote service. All progress
//! is persisted so an interrupted or suspended run resumes where it stopped.

pub mod travel;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::ServiceContext;
use crate::remote::{system_of, ChartOutcome, ClientError, ShipHandle, Waypoint};
use crate::storage::{Agent, LocationRecord};

pub use travel::{TravelCondition, TravelMode};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Remote(#[from] ClientError),

    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("travel to {destination} still refused after {attempts} corrective actions")]
    CorrectionsExhausted {
        destination: String,
        attempts: u32,
        #[source]
        last: ClientError,
    },

    #[error("ship keeps arriving away from {expected} ({times} times)")]
    Diverged { expected: String, times: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Idle,
    EnRouteFirst,
    Arrived,
    Charting,
    EnRouteNext,
    Verifying,
    Completed,
    Suspended,
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NavState::Idle => "idle",
            NavState::EnRouteFirst => "en-route-first",
            NavState::Arrived => "arrived",
            NavState::Charting => "charting",
            NavState::EnRouteNext => "en-route-next",
            NavState::Verifying => "verifying",
            NavState::Completed => "completed",
            NavState::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// Arrival lies further out than the suspension horizon.
    ArrivalBeyondHorizon { remaining: Duration },
    /// Verification kept finding uncharted locations.
    VerificationPending { passes: u32 },
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Suspended(SuspendReason),
}

pub struct Navigator {
    ctx: Arc<ServiceContext>,
    agent: Agent,
    ship: ShipHandle,
    backlog: VecDeque<LocationRecord>,
    state: NavState,
    label: usize,
}

impl Navigator {
    /// `label` only tags log lines.
    pub fn new(ctx: Arc<ServiceContext>, agent: Agent, label: usize) -> Self {
        let ship = ctx.client.ship(&agent.id, &agent.token);
        Self {
            ctx,
            agent,
            ship,
            backlog: VecDeque::new(),
            state: NavState::Idle,
            label,
        }
    }

    /// Worker seeded from the store: the agent record and its system's
    /// pending locations.
    pub fn from_store(ctx: Arc<ServiceContext>, agent_id: &str, label: usize) -> anyhow::Result<Self> {
        let agent = ctx
            .store
            .get_agent(agent_id)?
            .ok_or_else(|| anyhow::anyhow!("Agent '{}' not found", agent_id))?;
        let backlog = ctx.store.pending_locations(&agent.system)?;
        let mut navigator = Self::new(ctx, agent, label);
        navigator.assign(backlog);
        Ok(navigator)
    }

    /// Append locations to the backlog, in visiting order.
    pub fn assign(&mut self, locations: impl IntoIterator<Item = LocationRecord>) {
        self.backlog.extend(locations);
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn backlog(&self) -> impl Iterator<Item = &LocationRecord> {
        self.backlog.iter()
    }

    pub async fn run(&mut self) -> Result<RunOutcome, WorkerError> {
        let max_passes = self.ctx.config.worker.max_verification_passes.max(1);
        let mut pass = 0;

        loop {
            pass += 1;
            self.transition(NavState::Idle);

            if self.agent.completed || !self.backlog.iter().any(LocationRecord::needs_work) {
                self.complete()?;
                return Ok(RunOutcome::Completed);
            }

            if let Some(reason) = self.work_backlog().await? {
                self.transition(NavState::Suspended);
                return Ok(RunOutcome::Suspended(reason));
            }

            self.transition(NavState::Verifying);
            if self.verify().await? {
                self.complete()?;
                return Ok(RunOutcome::Completed);
            }

            self.backlog.clear();
            self.agent.completed = false;
            self.ctx.store.set_agent_completed(&self.agent.id, false)?;

            if pass >= max_passes {
                warn!(worker = self.label, agent = %self.agent.id, passes = pass, "verification still failing, deferring to next run");
                self.transition(NavState::Suspended);
                return Ok(RunOutcome::Suspended(SuspendReason::VerificationPending { passes: pass }));
            }

            let pending = self.ctx.store.pending_locations(&self.agent.system)?;
            self.assign(pending);
            info!(worker = self.label, agent = %self.agent.id, pass, pending = self.backlog.len(), "verification failed, restarting");
        }
    }

    /// Visit every backlog entry. `Some` means the run must suspend.
    async fn work_backlog(&mut self) -> Result<Option<SuspendReason>, WorkerError> {
        let max_divergences = self.ctx.config.worker.max_corrective_retries;
        let mut divergences = 0;

        self.transition(NavState::EnRouteFirst);
        if self.agent.arrival.is_none() {
            let Some(first) = self.backlog.front().map(|l| l.symbol.clone()) else {
                return Ok(None);
            };
            self.prepare_ship(true).await;
            let arrival = self.travel_to(&first, TravelMode::Warp).await?;
            self.set_arrival(arrival)?;
        } else {
            info!(worker = self.label, agent = %self.agent.id, "resuming pending travel");
        }

        loop {
            if let Some(reason) = self.wait_for_arrival().await? {
                return Ok(Some(reason));
            }

            self.transition(NavState::Charting);
            let expected = self.backlog.front().map(|l| l.symbol.clone());
            let reached_head = self.record_and_advance().await?;
            self.clear_arrival()?;
            if !reached_head {
                divergences += 1;
                if divergences > max_divergences {
                    return Err(WorkerError::Diverged {
                        expected: expected.unwrap_or_default(),
                        times: divergences,
                    });
                }
            }

            let Some(next) = self.backlog.front().map(|l| l.symbol.clone()) else {
                return Ok(None);
            };
            self.transition(NavState::EnRouteNext);
            let arrival = self.travel_to(&next, TravelMode::Navigate).await?;
            self.set_arrival(arrival)?;
        }
    }

    async fn wait_for_arrival(&mut self) -> Result<Option<SuspendReason>, WorkerError> {
        if let Some(arrival) = self.agent.arrival {
            let remaining = (arrival - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let horizon = self.ctx.config.worker.suspension_horizon();
            if remaining > horizon {
                info!(
                    worker = self.label,
                    agent = %self.agent.id,
                    remaining_secs = remaining.as_secs(),
                    horizon_secs = horizon.as_secs(),
                    "arrival beyond horizon, suspending"
                );
                return Ok(Some(SuspendReason::ArrivalBeyondHorizon { remaining }));
            }
            if !remaining.is_zero() {
                info!(worker = self.label, agent = %self.agent.id, wait_secs = remaining.as_secs_f64(), "waiting for arrival");
                tokio::time::sleep(remaining).await;
            }
        }
        self.transition(NavState::Arrived);
        Ok(None)
    }

    /// Chart where the ship is and pop the backlog head if that is where it
    /// was meant to be. Returns whether the head was reached.
    async fn record_and_advance(&mut self) -> Result<bool, WorkerError> {
        let waypoint = self.record_current_location().await?;

        let reached_head = self
            .backlog
            .front()
            .is_some_and(|head| head.symbol == waypoint.symbol);
        if reached_head {
            self.backlog.pop_front();
        } else {
            warn!(
                worker = self.label,
                agent = %self.agent.id,
                at = %waypoint.symbol,
                expected = self.backlog.front().map(|l| l.symbol.as_str()).unwrap_or("-"),
                "ship is not at the backlog head"
            );
            self.backlog.retain(|l| l.symbol != waypoint.symbol);
        }
        Ok(reached_head)
    }

    async fn record_current_location(&self) -> Result<Waypoint, WorkerError> {
        let client = &self.ctx.client;
        let waypoint = match client.chart(&self.ship).await? {
            ChartOutcome::Charted(waypoint) => {
                info!(worker = self.label, agent = %self.agent.id, waypoint = %waypoint.symbol, "charted");
                waypoint
            }
            ChartOutcome::AlreadyCharted => {
                let nav = client.ship_nav(&self.ship).await?;
                let waypoint = client
                    .waypoint(&self.ship.token, &nav.system_symbol, &nav.waypoint_symbol)
                    .await?;
                info!(worker = self.label, agent = %self.agent.id, waypoint = %waypoint.symbol, "already charted");
                waypoint
            }
        };

        let store = &self.ctx.store;
        if !store.set_location_charted(&waypoint.symbol, true)? {
            let mut record = LocationRecord::uncharted(&waypoint.symbol, self.system_for(&waypoint));
            record.charted = true;
            store.insert_location(&record)?;
        }
        self.record_facilities(&waypoint).await?;
        Ok(waypoint)
    }

    /// Flag marketplace/shipyard traits and snapshot their listings. Fetch
    /// failures only log.
    async fn record_facilities(&self, waypoint: &Waypoint) -> Result<(), WorkerError> {
        let store = &self.ctx.store;
        let client = &self.ctx.client;
        let system = self.system_for(waypoint);

        if waypoint.has_marketplace() {
            store.set_location_marketplace(&waypoint.symbol, true)?;
            match client.market(&self.ship.token, &system, &waypoint.symbol).await {
                Ok(market) => store.save_market_snapshot(&waypoint.symbol, &market)?,
                Err(e) => warn!(worker = self.label, waypoint = %waypoint.symbol, error = %e, "market fetch failed"),
            }
        }
        if waypoint.has_shipyard() {
            store.set_location_shipyard(&waypoint.symbol, true)?;
            match client.shipyard(&self.ship.token, &system, &waypoint.symbol).await {
                Ok(shipyard) => store.save_shipyard_snapshot(&waypoint.symbol, &shipyard)?,
                Err(e) => warn!(worker = self.label, waypoint = %waypoint.symbol, error = %e, "shipyard fetch failed"),
            }
        }
        Ok(())
    }

    /// Re-list the system remotely. Anything still uncharted is flagged
    /// back in the store and fails verification.
    async fn verify(&mut self) -> Result<bool, WorkerError> {
        let waypoints = self
            .ctx
            .client
            .list_waypoints(&self.ship.token, &self.agent.system)
            .await?;

        let mut verified = true;
        for waypoint in waypoints.iter().filter(|w| w.is_uncharted()) {
            verified = false;
            warn!(worker = self.label, agent = %self.agent.id, waypoint = %waypoint.symbol, "still uncharted");
            if !self.ctx.store.set_location_charted(&waypoint.symbol, false)? {
                self.ctx
                    .store
                    .insert_location(&LocationRecord::uncharted(&waypoint.symbol, &self.agent.system))?;
            }
        }
        Ok(verified)
    }

    fn set_arrival(&mut self, arrival: DateTime<Utc>) -> Result<(), WorkerError> {
        self.ctx.store.set_agent_arrival(&self.agent.id, Some(arrival))?;
        self.agent.arrival = Some(arrival);
        Ok(())
    }

    /// The ship is where the last arrival pointed and that location is
    /// recorded, so the next pass departs afresh.
    fn clear_arrival(&mut self) -> Result<(), WorkerError> {
        if self.agent.arrival.take().is_some() {
            self.ctx.store.set_agent_arrival(&self.agent.id, None)?;
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), WorkerError> {
        self.ctx.store.set_agent_completed(&self.agent.id, true)?;
        self.agent.completed = true;
        self.transition(NavState::Completed);
        Ok(())
    }

    fn system_for(&self, waypoint: &Waypoint) -> String {
        if waypoint.system_symbol.is_empty() {
            system_of(&waypoint.symbol).to_string()
        } else {
            waypoint.system_symbol.clone()
        }
    }

    fn transition(&mut self, next: NavState) {
        if self.state != next {
            debug!(worker = self.label, agent = %self.agent.id, from = %self.state, to = %next, "state change");
        }
        match next {
            NavState::Completed | NavState::Suspended => {
                info!(worker = self.label, agent = %self.agent.id, state = %next, "worker finished")
            }
            _ => {}
        }
        self.state = next;
    }
}
