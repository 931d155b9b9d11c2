//! HTTP client for the Kubernetes API server.
//!
//! This module wraps `reqwest` with bearer-token authentication, custom CA
//! trust and the mapping of API server status codes onto [`ApiError`].

use reqwest::{Certificate, Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ClusterConfig;
use crate::error::{ApiError, ConfigError, Result};

use super::types::Status;

/// Content type of JSON merge patches.
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Retry delay used when a 429 response carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Kubernetes API server client.
#[derive(Debug, Clone)]
pub struct KubeClient {
    /// HTTP client.
    client: Client,
    /// API server base URL, without a trailing slash.
    base_url: String,
    /// Bearer token.
    token: Option<String>,
}

impl KubeClient {
    /// Creates a client for `base_url` using the system trust store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Creates a client from the cluster section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API server is configured, or the token or CA
    /// file cannot be read.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let base_url = config
            .api_server
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ConfigError::validation("API server URL is required for the kube backend", "cluster.api_server")
            })?;

        let token = match (&config.token, &config.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => {
                let token = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
                    message: format!("Failed to read token file: {e}"),
                    location: Some(path.display().to_string()),
                })?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };

        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let Some(path) = &config.ca_cert_file {
            let pem = std::fs::read(path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to read CA bundle: {e}"),
                location: Some(path.display().to_string()),
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| ConfigError::ParseError {
                message: format!("Invalid CA bundle: {e}"),
                location: Some(path.display().to_string()),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        debug!("Kubernetes client for {base_url} ready");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Returns the API server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        trace!("{method} {path}");
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends a GET and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = send(self.request(Method::GET, path).query(query), path).await?;
        decode(response).await
    }

    /// Sends a POST with a JSON body and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = send(self.request(Method::POST, path).json(body), path).await?;
        decode(response).await
    }

    /// Sends a JSON merge patch and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn merge_patch<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ApiError::invalid_response(format!("Failed to encode patch: {e}")))?;
        let request = self
            .request(Method::PATCH, path)
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(payload);
        let response = send(request, path).await?;
        decode(response).await
    }

    /// Sends a DELETE with a JSON body, discarding the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        send(self.request(Method::DELETE, path).json(body), path).await?;
        Ok(())
    }
}

/// Sends a request and maps error statuses.
async fn send(request: RequestBuilder, path: &str) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::network(format!("Request to {path} failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let details: Status = serde_json::from_str(&body).unwrap_or_default();
    let message = if details.message.is_empty() {
        body
    } else {
        details.message
    };

    debug!("{path} answered {status}: {message}");
    Err(classify(status, path, &details.reason, message, retry_after).into())
}

/// Maps an error status onto [`ApiError`].
fn classify(
    status: StatusCode,
    path: &str,
    reason: &str,
    message: String,
    retry_after: Option<u64>,
) -> ApiError {
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound {
            path: path.to_string(),
        },
        StatusCode::CONFLICT if reason == "AlreadyExists" => ApiError::AlreadyExists { message },
        StatusCode::CONFLICT => ApiError::Conflict { message },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::AuthenticationFailed { message },
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            retry_after_secs: retry_after.filter(|s| *s > 0).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        s if s.is_server_error() => ApiError::ServerError {
            status: s.as_u16(),
            message,
        },
        s => ApiError::RequestFailed {
            status: s.as_u16(),
            message,
        },
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::invalid_response(format!("Failed to parse response: {e}")).into())
}
