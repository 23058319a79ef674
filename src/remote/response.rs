//! Tagged view of remote payloads: `{"data": ...}` or `{"error": {...}}`.

use serde::Deserialize;
use serde_json::Value;

use super::RawResponse;

/// Domain error codes the workers react to.
pub mod codes {
    pub const AGENT_SYMBOL_CLAIMED: u32 = 4111;
    pub const INSUFFICIENT_FUEL: u32 = 4203;
    pub const ALREADY_AT_DESTINATION: u32 = 4204;
    pub const IN_TRANSIT: u32 = 4214;
    pub const WAYPOINT_ALREADY_CHARTED: u32 = 4230;
    pub const SAME_SYSTEM_DESTINATION: u32 = 4235;
    pub const NOT_IN_ORBIT: u32 = 4236;
}

/// Structured error reported by the remote.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    pub code: u32,
    #[serde(default)]
    pub message: String,
    /// Code-specific detail, e.g. the in-progress arrival for 4214.
    #[serde(default)]
    pub data: Value,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote error {}: {}", self.code, self.message)
    }
}

/// A remote reply, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Success { status: u16, data: Value, meta: Option<Value> },
    Error(ApiError),
    /// Neither shape; carries the status so callers can report it.
    Malformed { status: u16, body: Value },
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

impl ApiResponse {
    pub fn from_raw(raw: RawResponse) -> Self {
        let RawResponse { status, body } = raw;

        if body.get("error").is_some() {
            return match serde_json::from_value::<ErrorEnvelope>(body.clone()) {
                Ok(envelope) => ApiResponse::Error(envelope.error),
                Err(_) => ApiResponse::Malformed { status, body },
            };
        }

        let is_success = (200..300).contains(&status);
        match body {
            Value::Object(mut map) if is_success && map.contains_key("data") => {
                let data = map.remove("data").unwrap_or(Value::Null);
                let meta = map.remove("meta");
                ApiResponse::Success { status, data, meta }
            }
            body => ApiResponse::Malformed { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let raw = RawResponse::new(
            200,
            json!({"data": {"symbol": "X1-AA-A1"}, "meta": {"total": 1, "page": 1}}),
        );
        match ApiResponse::from_raw(raw) {
            ApiResponse::Success { status, data, meta } => {
                assert_eq!(status, 200);
                assert_eq!(data["symbol"], "X1-AA-A1");
                assert_eq!(meta.unwrap()["total"], 1);
            }
            other => panic!("Expected Success, got {:?}", other),
        }
    }

    #[test]
    fn test_error_envelope_keeps_detail() {
        let raw = RawResponse::new(
            400,
            json!({"error": {
                "code": 4214,
                "message": "Ship is currently in-transit",
                "data": {"arrival": "2023-06-01T12:00:00.000Z", "secondsToArrival": 42}
            }}),
        );
        match ApiResponse::from_raw(raw) {
            ApiResponse::Error(err) => {
                assert_eq!(err.code, codes::IN_TRANSIT);
                assert_eq!(err.data["arrival"], "2023-06-01T12:00:00.000Z");
                assert!(err.to_string().contains("4214"));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_throttle_is_an_error_shape() {
        let raw = RawResponse::new(
            429,
            json!({"error": {"code": 429, "message": "You have reached your API limit."}}),
        );
        match ApiResponse::from_raw(raw) {
            ApiResponse::Error(err) => assert_eq!(err.code, 429),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognised_bodies_are_malformed() {
        let raw = RawResponse::new(502, Value::Null);
        assert!(matches!(
            ApiResponse::from_raw(raw),
            ApiResponse::Malformed { status: 502, .. }
        ));

        // A data envelope on a failing status is not trusted.
        let raw = RawResponse::new(500, json!({"data": {}}));
        assert!(matches!(
            ApiResponse::from_raw(raw),
            ApiResponse::Malformed { status: 500, .. }
        ));
    }
}
