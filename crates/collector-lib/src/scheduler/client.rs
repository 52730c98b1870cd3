//! HTTP client for the scheduler agent's operator API

use super::recordio;
use super::types::{AgentCall, AgentResponse, CallType, GetState, GetTasks};
use crate::error::{CollectorError, Result};
use crate::scrape::{http_client, FetchConfig};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Read-only view of the scheduler agent consumed by discovery and the
/// metadata cache
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Tasks known to the agent
    async fn get_tasks(&self, timeout: Duration) -> Result<GetTasks>;

    /// Full agent state (tasks, executors, frameworks)
    async fn get_state(&self, timeout: Duration) -> Result<GetState>;

    /// Flat numeric metrics snapshot of the agent
    async fn metrics_snapshot(&self, timeout: Duration) -> Result<BTreeMap<String, f64>>;
}

/// Operator API client bound to one agent
#[derive(Clone)]
pub struct SchedulerClient {
    http: reqwest::Client,
    agent_url: Url,
    api_url: Url,
}

impl SchedulerClient {
    /// Create a client with the default user agent and no custom TLS
    pub fn new(agent_url: &str) -> Result<Self> {
        Self::with_http_client(agent_url, http_client(&FetchConfig::default())?)
    }

    /// Create a client reusing an existing HTTP client (TLS, user agent)
    pub fn with_http_client(agent_url: &str, http: reqwest::Client) -> Result<Self> {
        let agent_url = Url::parse(agent_url)
            .map_err(|e| CollectorError::Config(format!("invalid agent URL {}: {}", agent_url, e)))?;
        let api_url = agent_url
            .join("/api/v1")
            .map_err(|e| CollectorError::Config(e.to_string()))?;

        Ok(Self {
            http,
            agent_url,
            api_url,
        })
    }

    pub fn agent_url(&self) -> &Url {
        &self.agent_url
    }

    /// Issue a non-streaming call and validate the response type
    async fn call(&self, call_type: CallType, timeout: Duration) -> Result<AgentResponse> {
        let url = self.api_url.to_string();
        debug!(url = %url, call = ?call_type, "Querying scheduler agent");

        let request = async {
            let response = self
                .http
                .post(self.api_url.clone())
                .header(ACCEPT, "application/json")
                .json(&AgentCall { call_type })
                .send()
                .await
                .map_err(|e| CollectorError::transport(&url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(CollectorError::HttpStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = response
                .bytes()
                .await
                .map_err(|e| CollectorError::transport(&url, e))?;

            Ok::<_, CollectorError>((content_type, body))
        };

        let (content_type, body) = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| CollectorError::Timeout(url.clone()))??;

        let message: Option<AgentResponse> = recordio::decode_last(content_type.as_deref(), &body)?;
        let expected = call_type.response_type();

        match message {
            Some(message) if message.response_type == expected => Ok(message),
            Some(message) => Err(CollectorError::Protocol {
                expected: expected.to_string(),
                actual: message.response_type,
            }),
            None => Err(CollectorError::Protocol {
                expected: expected.to_string(),
                actual: String::new(),
            }),
        }
    }
}

#[async_trait]
impl SchedulerApi for SchedulerClient {
    async fn get_tasks(&self, timeout: Duration) -> Result<GetTasks> {
        self.call(CallType::GetTasks, timeout)
            .await?
            .get_tasks
            .ok_or(CollectorError::EmptyResult("GET_TASKS"))
    }

    async fn get_state(&self, timeout: Duration) -> Result<GetState> {
        self.call(CallType::GetState, timeout)
            .await?
            .get_state
            .ok_or(CollectorError::EmptyResult("GET_STATE"))
    }

    async fn metrics_snapshot(&self, timeout: Duration) -> Result<BTreeMap<String, f64>> {
        let url = self
            .agent_url
            .join("/metrics/snapshot")
            .map_err(|e| CollectorError::Config(e.to_string()))?;
        let url_str = url.to_string();

        let request = async {
            let response = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| CollectorError::transport(&url_str, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(CollectorError::HttpStatus {
                    url: url_str.clone(),
                    status: status.as_u16(),
                });
            }

            response
                .json::<BTreeMap<String, serde_json::Value>>()
                .await
                .map_err(|e| CollectorError::parse(&url_str, e))
        };

        let raw = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| CollectorError::Timeout(url_str.clone()))??;

        Ok(raw
            .into_iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name, v)))
            .collect())
    }
}

/// Host part of the agent URL, without port
pub fn node_hostname(agent_url: &str) -> Result<String> {
    let url = Url::parse(agent_url)
        .map_err(|e| CollectorError::Config(format!("invalid agent URL {:?}: {}", agent_url, e)))?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(CollectorError::Config(format!(
            "agent URL {:?} has no host",
            agent_url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const TASKS_BODY: &str = r#"{
        "type": "GET_TASKS",
        "get_tasks": {
            "launched_tasks": [
                {"name": "web", "task_id": {"value": "web.1"}, "framework_id": {"value": "fw-1"}}
            ]
        }
    }"#;

    #[test]
    fn test_node_hostname() {
        let good = [
            ("http://localhost", "localhost"),
            ("http://localhost:9090", "localhost"),
            ("http://192.168.2.2", "192.168.2.2"),
            ("http://192.168.2.2:9090", "192.168.2.2"),
            ("https://192.168.2.2", "192.168.2.2"),
            (
                "http://some-agent.testing.example.com/",
                "some-agent.testing.example.com",
            ),
        ];
        for (input, expected) in good {
            assert_eq!(node_hostname(input).unwrap(), expected, "input {}", input);
        }

        for bad in ["$UNPARSED_ENVIRONMENT_VARIABLE", ""] {
            assert!(
                matches!(node_hostname(bad), Err(CollectorError::Config(_))),
                "input {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_get_tasks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1")
            .match_body(Matcher::Json(serde_json::json!({"type": "GET_TASKS"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TASKS_BODY)
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        let tasks = client.get_tasks(Duration::from_secs(5)).await.unwrap();

        assert_eq!(tasks.launched_tasks.len(), 1);
        assert_eq!(tasks.launched_tasks[0].id(), "web.1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_tasks_recordio() {
        let mut server = mockito::Server::new_async().await;
        let payload = TASKS_BODY.replace('\n', " ");
        let _mock = server
            .mock("POST", "/api/v1")
            .with_status(200)
            .with_header("content-type", "application/recordio")
            .with_body(format!("{}\n{}", payload.len(), payload))
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        let tasks = client.get_tasks(Duration::from_secs(5)).await.unwrap();
        assert_eq!(tasks.launched_tasks[0].name, "web");
    }

    #[tokio::test]
    async fn test_shared_http_client_sends_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1")
            .match_header("user-agent", "metrics-collector/test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TASKS_BODY)
            .create_async()
            .await;

        let http = http_client(&FetchConfig {
            user_agent: "metrics-collector/test".to_string(),
            ..Default::default()
        })
        .unwrap();
        let client = SchedulerClient::with_http_client(&server.url(), http).unwrap();
        client.get_tasks(Duration::from_secs(5)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_default_client_sends_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1")
            .match_header("user-agent", Matcher::Regex("^metrics-collector/".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TASKS_BODY)
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        client.get_tasks(Duration::from_secs(5)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_type_mismatch_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type": "GET_STATE", "get_state": {}}"#)
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        let err = client.get_tasks(Duration::from_secs(5)).await.unwrap_err();

        match err {
            CollectorError::Protocol { expected, actual } => {
                assert_eq!(expected, "GET_TASKS");
                assert_eq!(actual, "GET_STATE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_payload_is_empty_result() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type": "GET_TASKS"}"#)
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        let err = client.get_tasks(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, CollectorError::EmptyResult("GET_TASKS")));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1")
            .with_status(503)
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        let err = client.get_state(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, CollectorError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_metrics_snapshot_keeps_numbers() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics/snapshot")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"slave/uptime_secs": 12.5, "slave/registered": 1, "note": "x"}"#)
            .create_async()
            .await;

        let client = SchedulerClient::new(&server.url()).unwrap();
        let snapshot = client.metrics_snapshot(Duration::from_secs(5)).await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["slave/uptime_secs"], 12.5);
    }
}
