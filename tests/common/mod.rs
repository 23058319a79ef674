//! Shared fixtures: a scripted remote service and an in-memory context.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use starcharter::config::Config;
use starcharter::context::ServiceContext;
use starcharter::remote::{format_arrival, ApiRequest, RawResponse, RemoteService, TransportError};
use starcharter::storage::{Agent, LocationRecord, Store};

/// Answers calls from per-route scripts. Routes are keyed by the request's
/// display form, e.g. `POST /my/ships/ZCHART-X1-AA-1/chart`. Queued answers
/// are used first, then the route's standing answer, then a 404 error.
#[derive(Default)]
pub struct ScriptedRemote {
    queued: Mutex<HashMap<String, VecDeque<RawResponse>>>,
    standing: Mutex<HashMap<String, RawResponse>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer the next call on `route` once with `response`.
    pub fn push(&self, route: &str, response: RawResponse) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Answer every otherwise unscripted call on `route` with `response`.
    pub fn always(&self, route: &str, response: RawResponse) -> &Self {
        self.standing
            .lock()
            .unwrap()
            .insert(route.to_string(), response);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn routes(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.to_string()).collect()
    }

    pub fn count(&self, route: &str) -> usize {
        self.routes().iter().filter(|r| *r == route).count()
    }
}

#[async_trait::async_trait]
impl RemoteService for ScriptedRemote {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let route = request.to_string();
        self.log.lock().unwrap().push(request.clone());

        if let Some(response) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&route)
            .and_then(VecDeque::pop_front)
        {
            return Ok(response);
        }
        if let Some(response) = self.standing.lock().unwrap().get(&route) {
            return Ok(response.clone());
        }
        Ok(RawResponse::new(
            404,
            json!({"error": {"code": 404, "message": format!("unscripted route {}", route)}}),
        ))
    }
}

pub fn ok(data: Value) -> RawResponse {
    RawResponse::new(200, json!({ "data": data }))
}

pub fn err(code: u32, data: Value) -> RawResponse {
    RawResponse::new(
        400,
        json!({"error": {"code": code, "message": format!("error {}", code), "data": data}}),
    )
}

pub fn page(items: Vec<Value>) -> RawResponse {
    let total = items.len();
    RawResponse::new(
        200,
        json!({"data": items, "meta": {"total": total, "page": 1, "limit": 20}}),
    )
}

/// Arrival timestamp `secs` from now, in the remote's format.
pub fn arrival_in(secs: i64) -> String {
    format_arrival(&(Utc::now() + ChronoDuration::seconds(secs)))
}

pub fn travel(arrival: &str) -> RawResponse {
    ok(json!({"nav": {"route": {"arrival": arrival}}, "fuel": {"current": 0}}))
}

pub fn waypoint(symbol: &str, traits: &[&str]) -> Value {
    let system = starcharter::remote::system_of(symbol);
    let traits: Vec<Value> = traits
        .iter()
        .map(|t| json!({"symbol": t, "name": t}))
        .collect();
    json!({"symbol": symbol, "systemSymbol": system, "type": "PLANET", "traits": traits})
}

/// Defaults with pacing wide open and instant registration.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatch.rate_limit = 1_000;
    config.dispatch.burst_limit = 1_000;
    config.orchestrator.registration_delay_ms = 0;
    config.orchestrator.poll_interval_secs = 1;
    config
}

pub fn context(remote: Arc<ScriptedRemote>, config: Config) -> Arc<ServiceContext> {
    let store = Store::open_in_memory().unwrap();
    ServiceContext::new(config, store, remote)
}

pub fn seed_agent(ctx: &ServiceContext, id: &str, system: &str) -> Agent {
    let agent = Agent::new(id, format!("token-{}", id), system);
    ctx.store.insert_agent(&agent).unwrap();
    agent
}

pub fn seed_locations(ctx: &ServiceContext, symbols: &[&str]) {
    for symbol in symbols {
        let system = starcharter::remote::system_of(symbol);
        ctx.store
            .insert_location(&LocationRecord::uncharted(*symbol, system))
            .unwrap();
    }
}

/// Route helpers for the command ship of `agent`.
pub fn ship_route(method: &str, agent: &str, action: &str) -> String {
    format!("{} /my/ships/{}-1/{}", method, agent, action)
}
