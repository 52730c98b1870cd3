//! Client for the collector control API

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::{ParseError, Url};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with an error status
    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// API client for the collector's control API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(base_url)?;

        Ok(Self { client, base_url })
    }

    /// Aggregated component health; a 503 still carries the report
    pub async fn health(&self) -> Result<HealthReport> {
        let response = self.client.get(self.base_url.join("healthz")?).send().await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(response.json().await?);
        }
        decode(response).await
    }

    pub async fn list_containers(&self) -> Result<Vec<Container>> {
        self.get("containers").await
    }

    /// `None` when the container is not registered
    pub async fn get_container(&self, container_id: &str) -> Result<Option<Container>> {
        let url = self.container_url(container_id)?;
        let response = self.client.get(url).send().await?;
        match decode(response).await {
            Ok(container) => Ok(Some(container)),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn add_container(&self, request: &AddContainerRequest) -> Result<Container> {
        let url = self.base_url.join("container")?;
        let response = self.client.post(url).json(request).send().await?;
        decode(response).await
    }

    pub async fn remove_container(&self, container_id: &str) -> Result<()> {
        let url = self.container_url(container_id)?;
        let response = self.client.delete(url).send().await?;
        check(response).await.map(|_| ())
    }

    /// Container ids are a single, percent-encoded path segment
    fn container_url(&self, container_id: &str) -> Result<Url> {
        let mut url = self.base_url.join("container/")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(container_id);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path)?;
        let response = self.client.get(url).send().await?;
        decode(response).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ClientError::Api { status, message })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    Ok(check(response).await?.json().await?)
}

// API response types

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub container_id: String,
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddContainerRequest {
    pub container_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statsd_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statsd_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}
