use reqwest::StatusCode;
use thiserror::Error;

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

/// Failures while exchanging client credentials for a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("token endpoint rejected credentials with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("token response could not be used: {0}")]
    InvalidResponse(String),
}

/// Errors raised by Microsoft Graph requests.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("graph returned status {status}: {body}")]
    Status {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
    #[error("failed to decode graph response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid graph URL: {0}")]
    Url(String),
    #[error("could not refresh access token: {0}")]
    Auth(#[source] AuthError),
}

impl GraphError {
    pub fn status(status: StatusCode, body: String, retry_after: Option<u64>) -> Self {
        GraphError::Status {
            status,
            body,
            retry_after,
        }
    }

    /// Rate limits, server errors and transport failures are worth another attempt,
    /// and so is a 401: the next attempt runs with a re-acquired token.
    pub fn is_transient(&self) -> bool {
        match self {
            GraphError::Http(err) => is_transient_transport(err),
            GraphError::Status { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || is_transient_status(*status)
            }
            GraphError::Decode(_) | GraphError::Url(_) | GraphError::Auth(_) => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GraphError::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GraphError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors raised by the external record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("record store returned status {status}: {body}")]
    Status {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
    #[error("failed to decode record store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid record store URL: {0}")]
    Url(String),
}

impl StoreError {
    pub fn status(status: StatusCode, body: String, retry_after: Option<u64>) -> Self {
        StoreError::Status {
            status,
            body,
            retry_after,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(err) => is_transient_transport(err),
            StoreError::Status { status, .. } => is_transient_status(*status),
            StoreError::Decode(_) | StoreError::Url(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            StoreError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A fetched message that cannot become an `EmailRecord`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("message {id} has no send timestamp")]
    MissingTimestamp { id: String },
    #[error("message {id} has an unparseable timestamp {value:?}")]
    InvalidTimestamp { id: String, value: String },
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("could not determine sent items volume: {0}")]
    Count(#[source] GraphError),
    #[error("could not read existing records: {0}")]
    StoreRead(#[source] StoreError),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

/// Parses a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
