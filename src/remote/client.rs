//! Typed remote operations. Every call is routed through the shared
//! [`Dispatcher`] at the priority the operation warrants.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use super::response::{codes, ApiError, ApiResponse};
use super::time::parse_arrival;
use super::ApiRequest;
use crate::config::WorkerConfig;
use crate::dispatch::{DispatchError, Dispatcher, Priority};

pub const TRAIT_UNCHARTED: &str = "UNCHARTED";
pub const TRAIT_MARKETPLACE: &str = "MARKETPLACE";
pub const TRAIT_SHIPYARD: &str = "SHIPYARD";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Api(ApiError),

    #[error("unexpected response to {request} (status {status})")]
    Malformed { request: String, status: u16 },

    #[error("response to {request} is missing '{field}'")]
    MissingField { request: String, field: &'static str },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid arrival timestamp '{raw}': {source}")]
    Arrival {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl ClientError {
    /// The structured remote error, if that is what this is.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn has_code(&self, code: u32) -> bool {
        self.api().is_some_and(|e| e.code == code)
    }
}

/// A descriptive trait attached to a waypoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trait {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub symbol: String,
    #[serde(default)]
    pub system_symbol: String,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

impl Waypoint {
    pub fn has_trait(&self, symbol: &str) -> bool {
        self.traits.iter().any(|t| t.symbol == symbol)
    }

    pub fn is_uncharted(&self) -> bool {
        self.has_trait(TRAIT_UNCHARTED)
    }

    pub fn has_marketplace(&self) -> bool {
        self.has_trait(TRAIT_MARKETPLACE)
    }

    pub fn has_shipyard(&self) -> bool {
        self.has_trait(TRAIT_SHIPYARD)
    }
}

/// Where a ship currently is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipNav {
    pub system_symbol: String,
    pub waypoint_symbol: String,
    #[serde(default)]
    pub status: String,
}

/// Result of a chart attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartOutcome {
    /// This ship charted the waypoint.
    Charted(Waypoint),
    /// The remote already knows this waypoint.
    AlreadyCharted,
}

/// Credentials for a single ship.
#[derive(Debug, Clone)]
pub struct ShipHandle {
    pub agent: String,
    pub ship: String,
    pub token: String,
}

pub struct SpaceClient {
    dispatcher: Arc<Dispatcher>,
    ship_suffix: String,
    page_limit: u32,
}

impl SpaceClient {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &WorkerConfig) -> Self {
        Self {
            dispatcher,
            ship_suffix: config.ship_suffix.clone(),
            page_limit: config.page_limit.max(1),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The agent's command ship.
    pub fn ship(&self, agent: &str, token: &str) -> ShipHandle {
        ShipHandle {
            agent: agent.to_string(),
            ship: format!("{}{}", agent, self.ship_suffix),
            token: token.to_string(),
        }
    }

    async fn call(
        &self,
        request: ApiRequest,
        priority: Priority,
    ) -> Result<(Value, Option<Value>), ClientError> {
        let description = request.to_string();
        let raw = self.dispatcher.submit(request, priority).await?;

        match ApiResponse::from_raw(raw) {
            ApiResponse::Success { data, meta, .. } => Ok((data, meta)),
            ApiResponse::Error(err) => {
                debug!(request = %description, code = err.code, message = %err.message, "remote error");
                Err(ClientError::Api(err))
            }
            ApiResponse::Malformed { status, .. } => Err(ClientError::Malformed {
                request: description,
                status,
            }),
        }
    }

    async fn call_data(&self, request: ApiRequest, priority: Priority) -> Result<Value, ClientError> {
        self.call(request, priority).await.map(|(data, _)| data)
    }

    /// Register a new agent; returns its bearer token.
    pub async fn register(&self, symbol: &str, faction: &str) -> Result<String, ClientError> {
        let request = ApiRequest::post("register")
            .with_body(json!({ "faction": faction, "symbol": symbol }));
        let description = request.to_string();
        let data = self.call_data(request, Priority::Normal).await?;

        data.get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ClientError::MissingField {
                request: description,
                field: "token",
            })
    }

    pub async fn orbit(&self, ship: &ShipHandle) -> Result<(), ClientError> {
        let request = ApiRequest::post(format!("my/ships/{}/orbit", ship.ship))
            .with_token(&ship.token);
        self.call_data(request, Priority::Normal).await.map(|_| ())
    }

    /// Switch the ship to the fuel-free drift flight mode.
    pub async fn drift(&self, ship: &ShipHandle) -> Result<(), ClientError> {
        let request = ApiRequest::patch(format!("my/ships/{}/nav", ship.ship))
            .with_body(json!({ "flightMode": "DRIFT" }))
            .with_token(&ship.token);
        self.call_data(request, Priority::Normal).await.map(|_| ())
    }

    /// Inter-system travel. Resolves to the arrival time.
    pub async fn warp(&self, ship: &ShipHandle, waypoint: &str) -> Result<DateTime<Utc>, ClientError> {
        self.travel(ship, "warp", waypoint).await
    }

    /// In-system travel. Resolves to the arrival time.
    pub async fn navigate(
        &self,
        ship: &ShipHandle,
        waypoint: &str,
    ) -> Result<DateTime<Utc>, ClientError> {
        self.travel(ship, "navigate", waypoint).await
    }

    async fn travel(
        &self,
        ship: &ShipHandle,
        action: &str,
        waypoint: &str,
    ) -> Result<DateTime<Utc>, ClientError> {
        let request = ApiRequest::post(format!("my/ships/{}/{}", ship.ship, action))
            .with_body(json!({ "waypointSymbol": waypoint }))
            .with_token(&ship.token);
        let description = request.to_string();
        let data = self.call_data(request, Priority::High).await?;

        let raw = data
            .pointer("/nav/route/arrival")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingField {
                request: description,
                field: "nav.route.arrival",
            })?;
        parse_arrival(raw).map_err(|source| ClientError::Arrival {
            raw: raw.to_string(),
            source,
        })
    }

    /// Chart the waypoint the ship is at.
    pub async fn chart(&self, ship: &ShipHandle) -> Result<ChartOutcome, ClientError> {
        let request = ApiRequest::post(format!("my/ships/{}/chart", ship.ship))
            .with_token(&ship.token);

        match self.call_data(request, Priority::Normal).await {
            Ok(data) => {
                let waypoint = data.get("waypoint").cloned().unwrap_or(Value::Null);
                Ok(ChartOutcome::Charted(decode(waypoint, "charted waypoint")?))
            }
            Err(e) if e.has_code(codes::WAYPOINT_ALREADY_CHARTED) => Ok(ChartOutcome::AlreadyCharted),
            Err(e) => Err(e),
        }
    }

    /// The ship's current position.
    pub async fn ship_nav(&self, ship: &ShipHandle) -> Result<ShipNav, ClientError> {
        let request = ApiRequest::get(format!("my/ships/{}/nav", ship.ship)).with_token(&ship.token);
        decode(self.call_data(request, Priority::Normal).await?, "ship nav")
    }

    pub async fn waypoint(
        &self,
        token: &str,
        system: &str,
        waypoint: &str,
    ) -> Result<Waypoint, ClientError> {
        let request = ApiRequest::get(format!("systems/{}/waypoints/{}", system, waypoint))
            .with_token(token);
        decode(self.call_data(request, Priority::Normal).await?, "waypoint")
    }

    /// Every waypoint in a system, following pagination.
    pub async fn list_waypoints(&self, token: &str, system: &str) -> Result<Vec<Waypoint>, ClientError> {
        let mut waypoints = Vec::new();
        let mut page = 1u32;

        loop {
            let request = ApiRequest::get(format!("systems/{}/waypoints", system))
                .with_query("limit", self.page_limit)
                .with_query("page", page)
                .with_token(token);
            let (data, meta) = self.call(request, Priority::Normal).await?;
            let batch: Vec<Waypoint> = decode(data, "waypoint page")?;
            let fetched = batch.len();
            waypoints.extend(batch);

            let total = meta
                .as_ref()
                .and_then(|m| m.get("total"))
                .and_then(Value::as_u64)
                .unwrap_or(waypoints.len() as u64);
            if fetched == 0 || waypoints.len() as u64 >= total {
                break;
            }
            page += 1;
        }

        debug!(%system, count = waypoints.len(), "listed waypoints");
        Ok(waypoints)
    }

    /// Raw market payload for a waypoint. Low priority.
    pub async fn market(&self, token: &str, system: &str, waypoint: &str) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("systems/{}/waypoints/{}/market", system, waypoint))
            .with_token(token);
        self.call_data(request, Priority::Low).await
    }

    /// Raw shipyard payload for a waypoint. Low priority.
    pub async fn shipyard(&self, token: &str, system: &str, waypoint: &str) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("systems/{}/waypoints/{}/shipyard", system, waypoint))
            .with_token(token);
        self.call_data(request, Priority::Low).await
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &'static str) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::Decode { what, source })
}

/// System symbol of a waypoint symbol (`X1-AB12-C34` -> `X1-AB12`).
pub fn system_of(waypoint: &str) -> &str {
    waypoint.rsplit_once('-').map_or(waypoint, |(system, _)| system)
}
