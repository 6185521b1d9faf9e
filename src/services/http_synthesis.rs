//! HTTP client for the speech and media synthesis backend.
//!
//! The backend exposes a single endpoint, `POST {base}/synthesize`, taking a
//! [`SynthesisRequest`] and answering with the stored [`SynthesizedAsset`].

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{SynthesisRequest, SynthesisService, SynthesizedAsset};
use crate::error::ServiceError;
use crate::pipeline::config::ConfigError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// Synthesis collaborator reached over HTTP.
pub struct HttpSynthesisClient {
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpSynthesisClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ServiceError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| {
                ServiceError::RequestFailed(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    /// Creates a client from `FORGE_SYNTHESIS_URL` and the optional
    /// `FORGE_SYNTHESIS_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var("FORGE_SYNTHESIS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("FORGE_SYNTHESIS_URL".to_string()))?;
        let api_key = env::var("FORGE_SYNTHESIS_API_KEY").ok();

        Self::new(base_url, api_key).map_err(|e| ConfigError::InvalidValue {
            key: "FORGE_SYNTHESIS_URL".to_string(),
            message: e.to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/synthesize", self.base_url)
    }
}

#[async_trait]
impl SynthesisService for HttpSynthesisClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAsset, ServiceError> {
        let mut http_request = self
            .http_client
            .post(self.endpoint())
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = http_request
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ServiceError::RequestFailed(format!(
                "synthesis backend returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let asset: SynthesizedAsset = response
            .json()
            .await
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
        if asset.key.is_empty() {
            return Err(ServiceError::EmptyResponse(format!(
                "no asset key for {}",
                request.target_key
            )));
        }

        debug!(branch = %request.branch_key, key = %asset.key, "Asset stored");
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = HttpSynthesisClient::new("http://synth.local:8080/", None).unwrap();
        assert_eq!(client.endpoint(), "http://synth.local:8080/synthesize");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_request_failure() {
        let client = HttpSynthesisClient::new("http://127.0.0.1:1", None).unwrap();
        let request = SynthesisRequest {
            branch_key: crate::pipeline::candidate::BranchKey::ScriptNarration,
            text: "はい".to_string(),
            target_key: "contents/jp/audio/x.mp3".to_string(),
            language: "jp".to_string(),
        };
        let err = client.synthesize(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::RequestFailed(_)));
    }
}
