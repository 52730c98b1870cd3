//! Error taxonomy for discovery, scraping and the scheduler protocol

use thiserror::Error;

/// Errors surfaced by the collector library
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Malformed configuration (static URL, agent URL, role)
    #[error("configuration error: {0}")]
    Config(String),

    /// A discovery source could not yield an endpoint
    #[error("discovery error: {0}")]
    Discovery(String),

    /// The request to a target failed before a response was received
    #[error("error making HTTP request to {url}: {message}")]
    Transport { url: String, message: String },

    /// The target answered with a non-success status
    #[error("{url} returned HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// The response body could not be decoded
    #[error("error reading metrics for {url}: {message}")]
    Parse { url: String, message: String },

    /// The scheduler answered with an unexpected message type
    #[error("expected response type {expected:?}, got {actual:?}")]
    Protocol { expected: String, actual: String },

    /// The scheduler answered with the right type but no payload
    #[error("the {0} response from the scheduler agent was empty")]
    EmptyResult(&'static str),

    /// A registration collided with an existing listener port
    #[error("port {port} is already in use by container {owner}")]
    Conflict { port: u16, owner: String },

    /// A registration request was rejected before touching the registry
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request exceeded its deadline
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CollectorError {
    pub fn transport(url: impl ToString, err: impl std::fmt::Display) -> Self {
        CollectorError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn parse(url: impl ToString, err: impl std::fmt::Display) -> Self {
        CollectorError::Parse {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error should be reported as a registration conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, CollectorError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
