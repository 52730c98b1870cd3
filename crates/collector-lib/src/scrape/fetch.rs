//! Transport for exposition endpoints
//!
//! http(s) targets go through a shared `reqwest` client. `unix` targets name
//! a socket path; the request path defaults to `/metrics` and may be
//! overridden with a `path` query parameter.

use super::parser::TEXT_FORMAT;
use crate::discovery::DEFAULT_METRICS_PATH;
use crate::error::{CollectorError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, HOST, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Client TLS settings for https targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Deadline for each individual request
    pub response_timeout: Duration,
    /// File holding a bearer token; re-read on every request
    pub bearer_token_path: Option<PathBuf>,
    pub tls: TlsConfig,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
            bearer_token_path: None,
            tls: TlsConfig::default(),
            user_agent: format!("metrics-collector/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct Fetcher {
    http: reqwest::Client,
    config: FetchConfig,
}

/// HTTP client carrying the user agent and TLS settings of `config`
///
/// Shared by scrapes and scheduler calls. Unreadable TLS material is a
/// configuration error.
pub fn http_client(config: &FetchConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .danger_accept_invalid_certs(config.tls.insecure_skip_verify);

    if let Some(ca_path) = &config.tls.ca_path {
        let pem = read_pem(ca_path)?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| CollectorError::Config(format!("invalid CA {}: {}", ca_path.display(), e)))?;
        builder = builder.add_root_certificate(cert);
    }

    match (&config.tls.cert_path, &config.tls.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let mut pem = read_pem(cert_path)?;
            pem.push(b'\n');
            pem.extend(read_pem(key_path)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                CollectorError::Config(format!("invalid client certificate {}: {}", cert_path.display(), e))
            })?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(CollectorError::Config(
                "TLS cert_path and key_path must be set together".to_string(),
            ))
        }
    }

    builder
        .build()
        .map_err(|e| CollectorError::Config(format!("failed to build HTTP client: {}", e)))
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let http = http_client(&config)?;
        Ok(Self { http, config })
    }

    pub fn response_timeout(&self) -> Duration {
        self.config.response_timeout
    }

    /// Fetch the raw body of one endpoint
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let token = self.bearer_token(url).await?;
        match url.scheme() {
            "http" | "https" => self.fetch_http(url, token).await,
            "unix" => self.fetch_unix(url, token).await,
            other => Err(CollectorError::transport(
                strip_user_info(url),
                format!("unsupported scheme {}", other),
            )),
        }
    }

    async fn bearer_token(&self, url: &Url) -> Result<Option<String>> {
        let Some(path) = &self.config.bearer_token_path else {
            return Ok(None);
        };
        let token = tokio::fs::read_to_string(path).await.map_err(|e| {
            CollectorError::transport(
                strip_user_info(url),
                format!("could not read bearer token {}: {}", path.display(), e),
            )
        })?;
        Ok(Some(token.trim().to_string()))
    }

    async fn fetch_http(&self, url: &Url, token: Option<String>) -> Result<Vec<u8>> {
        let display = strip_user_info(url);
        let mut request_url = url.clone();
        let _ = request_url.set_username("");
        let _ = request_url.set_password(None);

        let mut request = self
            .http
            .get(request_url)
            .header(ACCEPT, TEXT_FORMAT)
            .timeout(self.config.response_timeout);

        if !url.username().is_empty() {
            request = request.basic_auth(url.username(), url.password());
        } else if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CollectorError::Timeout(display.clone())
            } else {
                CollectorError::transport(&display, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::HttpStatus {
                url: display,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CollectorError::parse(&display, e))?;
        Ok(body.to_vec())
    }

    async fn fetch_unix(&self, url: &Url, token: Option<String>) -> Result<Vec<u8>> {
        let display = strip_user_info(url);
        let socket = url.path().to_string();
        let path = url
            .query_pairs()
            .find(|(k, _)| k == "path")
            .map(|(_, v)| v.into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string());

        let exchange = async {
            let stream = tokio::net::UnixStream::connect(&socket)
                .await
                .map_err(|e| CollectorError::transport(&display, e))?;
            let (mut sender, conn) = hyper::client::conn::handshake(stream)
                .await
                .map_err(|e| CollectorError::transport(&display, e))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "Unix socket connection closed with error");
                }
            });

            let mut request = hyper::Request::get(path.as_str())
                .header(HOST, "localhost")
                .header(ACCEPT, TEXT_FORMAT)
                .header(USER_AGENT, self.config.user_agent.as_str());
            if let Some(token) = &token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = request
                .body(hyper::Body::empty())
                .map_err(|e| CollectorError::transport(&display, e))?;

            let response = sender
                .send_request(request)
                .await
                .map_err(|e| CollectorError::transport(&display, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(CollectorError::HttpStatus {
                    url: display.clone(),
                    status: status.as_u16(),
                });
            }

            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| CollectorError::parse(&display, e))?;
            Ok(body.to_vec())
        };

        match tokio::time::timeout(self.config.response_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(CollectorError::Timeout(strip_user_info(url))),
        }
    }
}

/// URL as reported in tags and errors, without credentials
pub fn strip_user_info(url: &Url) -> String {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| CollectorError::Config(format!("could not read {}: {}", path.display(), e)))
}
