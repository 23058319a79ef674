//! Travel requests and the remote conditions a worker recovers from.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{Navigator, WorkerError};
use crate::remote::response::codes;
use crate::remote::{parse_arrival, ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelMode {
    /// Inter-system jump.
    Warp,
    /// In-system flight.
    Navigate,
}

impl std::fmt::Display for TravelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TravelMode::Warp => write!(f, "warp"),
            TravelMode::Navigate => write!(f, "navigate"),
        }
    }
}

/// Remote refusals a travel request can recover from.
#[derive(Debug, Clone, PartialEq)]
pub enum TravelCondition {
    /// Orbit, drift, retry.
    NotInOrbit,
    /// Drift, retry.
    InsufficientFuel,
    /// Already flying; adopt the in-progress arrival.
    InTransit { arrival: DateTime<Utc> },
    /// Re-issue as an in-system navigate.
    SameSystem,
    /// Arrived already; arrival is now.
    AlreadyThere,
}

impl TravelCondition {
    /// `None` means the error is fatal for the request.
    pub fn classify(error: &ApiError) -> Option<Self> {
        match error.code {
            codes::NOT_IN_ORBIT => Some(TravelCondition::NotInOrbit),
            codes::INSUFFICIENT_FUEL => Some(TravelCondition::InsufficientFuel),
            codes::IN_TRANSIT => error
                .data
                .get("arrival")
                .and_then(Value::as_str)
                .and_then(|raw| parse_arrival(raw).ok())
                .map(|arrival| TravelCondition::InTransit { arrival }),
            codes::SAME_SYSTEM_DESTINATION => Some(TravelCondition::SameSystem),
            codes::ALREADY_AT_DESTINATION => Some(TravelCondition::AlreadyThere),
            _ => None,
        }
    }
}

impl Navigator {
    /// Request travel and resolve the arrival time, applying at most
    /// `max_corrective_retries` corrective actions along the way.
    pub(super) async fn travel_to(
        &mut self,
        destination: &str,
        mode: TravelMode,
    ) -> Result<DateTime<Utc>, WorkerError> {
        let max_corrections = self.ctx.config.worker.max_corrective_retries;
        let mut mode = mode;
        let mut corrections = 0;

        loop {
            let client = &self.ctx.client;
            let result = match mode {
                TravelMode::Warp => client.warp(&self.ship, destination).await,
                TravelMode::Navigate => client.navigate(&self.ship, destination).await,
            };
            let err = match result {
                Ok(arrival) => {
                    info!(worker = self.label, agent = %self.agent.id, %destination, %mode, %arrival, "travel accepted");
                    return Ok(arrival);
                }
                Err(e) => e,
            };

            let Some(condition) = err.api().and_then(TravelCondition::classify) else {
                error!(worker = self.label, agent = %self.agent.id, %destination, %mode, error = %err, "travel request failed");
                return Err(WorkerError::Remote(err));
            };

            match condition {
                TravelCondition::SameSystem if mode == TravelMode::Warp => {
                    info!(worker = self.label, agent = %self.agent.id, %destination, "destination is in-system, navigating instead");
                    mode = TravelMode::Navigate;
                    continue;
                }
                TravelCondition::InTransit { arrival } => {
                    info!(worker = self.label, agent = %self.agent.id, %destination, %arrival, "already in transit, adopting arrival");
                    return Ok(arrival);
                }
                TravelCondition::AlreadyThere => {
                    info!(worker = self.label, agent = %self.agent.id, %destination, "already at destination");
                    return Ok(Utc::now());
                }
                TravelCondition::NotInOrbit
                | TravelCondition::InsufficientFuel
                | TravelCondition::SameSystem => {}
            }

            if corrections >= max_corrections {
                return Err(WorkerError::CorrectionsExhausted {
                    destination: destination.to_string(),
                    attempts: corrections,
                    last: err,
                });
            }
            corrections += 1;
            warn!(worker = self.label, agent = %self.agent.id, %destination, ?condition, corrections, "correcting travel request");

            match condition {
                TravelCondition::NotInOrbit => self.prepare_ship(true).await,
                TravelCondition::InsufficientFuel => self.prepare_ship(false).await,
                TravelCondition::SameSystem => mode = TravelMode::Navigate,
                TravelCondition::InTransit { .. } | TravelCondition::AlreadyThere => {}
            }
        }
    }

    /// Put the ship in orbit (optionally) and into drift mode. Refusals are
    /// only logged: the travel request that follows reports the ship's real
    /// condition.
    pub(super) async fn prepare_ship(&self, orbit: bool) {
        let client = &self.ctx.client;
        if orbit {
            if let Err(e) = client.orbit(&self.ship).await {
                warn!(worker = self.label, agent = %self.agent.id, error = %e, "orbit refused");
            }
        }
        if let Err(e) = client.drift(&self.ship).await {
            warn!(worker = self.label, agent = %self.agent.id, error = %e, "drift refused");
        }
    }
}
