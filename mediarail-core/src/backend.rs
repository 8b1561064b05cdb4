//! Backend transport seam
//!
//! The storage and catalog clients talk to the backend through the
//! `StorageBackend` trait rather than a concrete HTTP client, so resolution
//! ordering and failure handling can be tested against scripted backends.
//! The production implementation wraps `reqwest`. No call here retries:
//! the transport deadline is the only timeout in the pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use url::Url;

use crate::config::NetworkConfig;

/// Errors surfaced by backend transport calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Backend returned HTTP {status}")]
    Status { status: u16 },

    #[error("Response body was not valid JSON: {reason}")]
    Decode { reason: String },

    #[error("Invalid endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },
}

/// Operations the pipeline needs from the object-storage/catalog backend.
///
/// Endpoints are relative paths (already query-encoded where needed); the
/// implementation owns base-URL joining and authentication.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// GET expecting a JSON body.
    async fn get_json(&self, endpoint: &str) -> Result<Value, BackendError>;

    /// GET expecting a raw binary body.
    async fn get_bytes(&self, endpoint: &str) -> Result<Bytes, BackendError>;

    /// Multipart POST of a single file part named `file`.
    async fn post_multipart(
        &self,
        endpoint: &str,
        file_name: &str,
        mime: &str,
        body: Bytes,
    ) -> Result<Value, BackendError>;

    /// JSON POST.
    async fn post_json(&self, endpoint: &str, body: Value) -> Result<Value, BackendError>;

    /// JSON PATCH.
    async fn patch_json(&self, endpoint: &str, body: Value) -> Result<Value, BackendError>;

    /// DELETE, body ignored.
    async fn delete(&self, endpoint: &str) -> Result<(), BackendError>;
}

/// Production backend over `reqwest`.
pub struct HttpBackend {
    base_url: Url,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Build a backend from network configuration.
    ///
    /// # Errors
    ///
    /// - `BackendError::InvalidEndpoint` - Base URL does not parse
    pub fn new(config: &NetworkConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.base_url).map_err(|_| BackendError::InvalidEndpoint {
            endpoint: config.base_url.clone(),
        })?;

        Ok(Self {
            base_url,
            auth_token: config.auth_token.clone(),
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .user_agent(config.user_agent)
                .redirect(reqwest::redirect::Policy::limited(3))
                .build()
                .expect("HTTP client creation should not fail"),
        })
    }

    fn join(&self, endpoint: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(endpoint)
            .map_err(|_| BackendError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
            })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Transport { reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status { status: status.as_u16() });
        }
        Ok(response)
    }

    async fn decode_json(response: reqwest::Response) -> Result<Value, BackendError> {
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode { reason: e.to_string() })
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    async fn get_json(&self, endpoint: &str) -> Result<Value, BackendError> {
        let url = self.join(endpoint)?;
        let response = self.send(self.request(reqwest::Method::GET, url)).await?;
        Self::decode_json(response).await
    }

    async fn get_bytes(&self, endpoint: &str) -> Result<Bytes, BackendError> {
        let url = self.join(endpoint)?;
        let response = self.send(self.request(reqwest::Method::GET, url)).await?;
        response
            .bytes()
            .await
            .map_err(|e| BackendError::Transport { reason: e.to_string() })
    }

    async fn post_multipart(
        &self,
        endpoint: &str,
        file_name: &str,
        mime: &str,
        body: Bytes,
    ) -> Result<Value, BackendError> {
        let url = self.join(endpoint)?;

        let part = reqwest::multipart::Part::stream(body)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| BackendError::Transport { reason: e.to_string() })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .send(self.request(reqwest::Method::POST, url).multipart(form))
            .await?;
        Self::decode_json(response).await
    }

    async fn post_json(&self, endpoint: &str, body: Value) -> Result<Value, BackendError> {
        let url = self.join(endpoint)?;
        let response = self
            .send(self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        Self::decode_json(response).await
    }

    async fn patch_json(&self, endpoint: &str, body: Value) -> Result<Value, BackendError> {
        let url = self.join(endpoint)?;
        let response = self
            .send(self.request(reqwest::Method::PATCH, url).json(&body))
            .await?;
        Self::decode_json(response).await
    }

    async fn delete(&self, endpoint: &str) -> Result<(), BackendError> {
        let url = self.join(endpoint)?;
        self.send(self.request(reqwest::Method::DELETE, url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_base(base: &str) -> NetworkConfig {
        NetworkConfig {
            base_url: base.to_string(),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn base_url_joining_preserves_path_prefix() {
        let backend = HttpBackend::new(&config_with_base("https://api.example.com/api/v1/")).unwrap();
        let joined = backend.join("s3/upload").unwrap();
        assert_eq!(joined.as_str(), "https://api.example.com/api/v1/s3/upload");
    }

    #[test]
    fn invalid_base_url_rejected() {
        let result = HttpBackend::new(&config_with_base("not a url"));
        assert!(matches!(result, Err(BackendError::InvalidEndpoint { .. })));
    }
}
