//! Remote service seam: request/response model, transport trait, and the
//! typed operations the workers drive.

pub mod client;
pub mod http;
pub mod response;
pub mod time;

use serde_json::Value;
use thiserror::Error;

pub use client::{
    system_of, ChartOutcome, ClientError, ShipHandle, ShipNav, SpaceClient, Trait, Waypoint,
};
pub use http::HttpRemote;
pub use response::{ApiError, ApiResponse};
pub use time::{format_arrival, parse_arrival, IntoArrival};

/// HTTP status the remote uses to signal throttling.
pub const TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Request verbs the remote accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Patch => write!(f, "PATCH"),
        }
    }
}

/// One outbound call, described independently of the transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL.
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    /// JSON body for POST/PATCH.
    pub body: Option<Value>,
    /// Bearer token, if the call is authenticated.
    pub token: Option<String>,
}

impl ApiRequest {
    fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: None,
            token: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Patch, endpoint)
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl std::fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} /{}", self.method, self.endpoint)
    }
}

/// Status and decoded body of a completed call.
///
/// A body that is not JSON decodes to `Value::Null`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_throttled(&self) -> bool {
        self.status == TOO_MANY_REQUESTS
    }
}

/// Transport for outbound calls. The dispatcher is the only caller.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}
