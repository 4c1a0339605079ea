use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::snapshot::{
    ConfigEntry, ConfigResponse, ConfigUpdate, StreamStatus, SystemHealth, SystemStatus,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    Url(String),
    #[error("request failed: {0}")]
    Http(String),
    #[error("API {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("timeout")]
    Timeout,
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Http(err.to_string())
        }
    }
}

/// JSON client for the appliance's `/api` resources.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base))
    }

    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn stream_status(&self) -> Result<StreamStatus, ApiError> {
        self.get_json("stream/status").await
    }

    pub async fn system_health(&self) -> Result<SystemHealth, ApiError> {
        self.get_json("system/health").await
    }

    pub async fn system_status(&self) -> Result<SystemStatus, ApiError> {
        self.get_json("system/status").await
    }

    pub async fn config(&self) -> Result<ConfigResponse, ApiError> {
        self.get_json("config").await
    }

    pub async fn config_value(&self, key: &str) -> Result<ConfigEntry, ApiError> {
        self.get_json(&format!("config/{key}")).await
    }

    pub async fn update_config(&self, key: &str, value: &str) -> Result<ConfigUpdate, ApiError> {
        let url = self.url(&format!("config/{key}"))?;
        let response = self
            .http
            .put(url)
            .json(&json!({ "value": value }))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Current frame as JPEG.
    pub async fn snapshot(&self) -> Result<Bytes, ApiError> {
        let url = self.url("stream/snapshot")?;
        let response = Self::check(self.http.get(url).send().await?)?;
        Ok(response.bytes().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path)?;
        let response = self.http.get(url).send().await?;
        Self::decode(response).await
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::Url(format!("{}{path}: {err}", self.base)))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check(response)?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }

    pub(crate) fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        })
    }
}
