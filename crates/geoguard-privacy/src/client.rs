//! Protection service client
//!
//! POST `<endpoint>/protect_location`. Any non-2xx status or transport error
//! is a failure; there are no retries and no partial results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use geoguard_relay::LatLng;

use crate::error::PrivacyError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub privacy_level: u8,
    pub save_history: bool,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProtectionResponse {
    pub original: LatLng,
    pub private: LatLng,
    #[serde(default)]
    pub is_sensitive: bool,
}

#[async_trait]
pub trait ProtectionService: Send + Sync {
    async fn protect(&self, request: &ProtectionRequest) -> Result<ProtectionResponse>;
}

pub struct HttpProtectionClient {
    client: reqwest::Client,
    url: Url,
}

impl HttpProtectionClient {
    pub fn new(endpoint: &Url, timeout: Duration) -> Result<Self> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| PrivacyError::InvalidEndpoint(endpoint.to_string()))?
            .pop_if_empty()
            .push("protect_location");

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("GeoGuard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ProtectionService for HttpProtectionClient {
    async fn protect(&self, request: &ProtectionRequest) -> Result<ProtectionResponse> {
        let response = self.client.post(self.url.clone()).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PrivacyError::ServiceStatus(status.as_u16()));
        }

        Ok(response.json::<ProtectionResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ProtectionRequest {
        ProtectionRequest {
            latitude: 40.7128,
            longitude: -74.006,
            privacy_level: 5,
            save_history: true,
            domain: "example.com".to_string(),
        }
    }

    fn client_for(server: &MockServer) -> HttpProtectionClient {
        let endpoint = Url::parse(&server.uri()).unwrap();
        HttpProtectionClient::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_path() {
        let endpoint = Url::parse("http://127.0.0.1:5000").unwrap();
        let client = HttpProtectionClient::new(&endpoint, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url().as_str(), "http://127.0.0.1:5000/protect_location");

        let endpoint = Url::parse("https://geo.example.org/api/").unwrap();
        let client = HttpProtectionClient::new(&endpoint, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url().as_str(), "https://geo.example.org/api/protect_location");
    }

    #[tokio::test]
    async fn test_protect_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/protect_location"))
            .and(body_json(json!({
                "latitude": 40.7128,
                "longitude": -74.006,
                "privacy_level": 5,
                "save_history": true,
                "domain": "example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "original": {"latitude": 40.7128, "longitude": -74.006},
                "private": {"latitude": 40.7135, "longitude": -74.0048},
                "is_sensitive": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).protect(&request()).await.unwrap();
        assert_eq!(response.private, LatLng::new(40.7135, -74.0048));
        assert_eq!(response.original, LatLng::new(40.7128, -74.006));
        assert!(!response.is_sensitive);
    }

    #[tokio::test]
    async fn test_error_status_is_failure_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/protect_location"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).protect(&request()).await;
        assert!(matches!(result, Err(PrivacyError::ServiceStatus(503))));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let result = client_for(&server).protect(&request()).await;
        assert!(matches!(result, Err(PrivacyError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let endpoint = Url::parse("http://127.0.0.1:9").unwrap();
        let client = HttpProtectionClient::new(&endpoint, Duration::from_millis(500)).unwrap();

        let result = client.protect(&request()).await;
        assert!(matches!(result, Err(PrivacyError::Transport(_))));
    }
}
