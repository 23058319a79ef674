use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};

use super::{ApiRequest, Method, RawResponse, RemoteService, TransportError};
use crate::config::ApiConfig;

/// reqwest-backed transport for the remote API.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
}

impl HttpRemote {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        let base_url = Url::parse(&config.base_url)?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, endpoint: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| TransportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl RemoteService for HttpRemote {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(&request.endpoint)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url).query(&request.query),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
        };

        if request.method != Method::Get {
            let body = request
                .body
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
            builder = builder.json(&body);
        }
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

        Ok(RawResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_join_onto_base() {
        let remote = HttpRemote::new(&ApiConfig::default()).unwrap();
        let url = remote.url_for("my/ships/ZCHART-X1-AA-1/orbit").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.spacetraders.io/v2/my/ships/ZCHART-X1-AA-1/orbit"
        );

        let status = remote.url_for("").unwrap();
        assert_eq!(status.as_str(), "https://api.spacetraders.io/v2/");
    }

    #[test]
    fn test_bad_base_url_is_rejected() {
        let config = ApiConfig {
            base_url: "not a url".to_string(),
            ..ApiConfig::default()
        };
        assert!(HttpRemote::new(&config).is_err());
    }
}
