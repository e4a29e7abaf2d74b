use crate::error::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AIRTABLE_URL: &str = "https://api.airtable.com";

/// Airtable accepts at most ten records per create or update call.
pub const AIRTABLE_MAX_WRITE_BATCH: usize = 10;

/// Graph caps `$top` on message listings.
const GRAPH_MAX_PAGE_SIZE: usize = 1000;

/// Base URLs of the three remote services.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub login_url: String,
    pub graph_url: String,
    pub airtable_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            airtable_url: DEFAULT_AIRTABLE_URL.to_string(),
        }
    }
}

/// Everything a run needs, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub mailbox_address: String,
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub http_timeout: Duration,
    pub airtable_api_key: String,
    pub airtable_base_id: String,
    pub airtable_table_name: String,
    pub airtable_write_retries: u32,
    pub airtable_write_batch_size: usize,
    pub endpoints: Endpoints,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let batch_size = required_number::<usize, _>(&lookup, "BATCH_SIZE")?;
        if batch_size > GRAPH_MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                key: "BATCH_SIZE",
                value: batch_size.to_string(),
                reason: format!("must not exceed {GRAPH_MAX_PAGE_SIZE}"),
            });
        }

        let endpoints = Endpoints {
            login_url: optional_string(&lookup, "LOGIN_URL", DEFAULT_LOGIN_URL),
            graph_url: optional_string(&lookup, "GRAPH_API_URL", DEFAULT_GRAPH_URL),
            airtable_url: optional_string(&lookup, "AIRTABLE_API_URL", DEFAULT_AIRTABLE_URL),
        };

        Ok(Self {
            tenant_id: required(&lookup, "TENANT_ID")?,
            client_id: required(&lookup, "CLIENT_ID")?,
            client_secret: required(&lookup, "CLIENT_SECRET")?,
            mailbox_address: required(&lookup, "MAILBOX_ADDRESS")?,
            batch_size,
            max_workers: required_number(&lookup, "MAX_WORKERS")?,
            max_retries: required_number(&lookup, "MAX_RETRIES")?,
            retry_base_delay: Duration::from_millis(optional_number(
                &lookup,
                "RETRY_BASE_DELAY_MS",
                10_000,
            )?),
            retry_max_delay: Duration::from_millis(optional_number(
                &lookup,
                "RETRY_MAX_DELAY_MS",
                300_000,
            )?),
            http_timeout: Duration::from_secs(optional_positive_number(&lookup, "HTTP_TIMEOUT_SECS", 30)?),
            airtable_api_key: required(&lookup, "AIRTABLE_API_KEY")?,
            airtable_base_id: required(&lookup, "AIRTABLE_BASE_ID")?,
            airtable_table_name: required(&lookup, "AIRTABLE_TABLE_NAME")?,
            airtable_write_retries: optional_number(&lookup, "AIRTABLE_WRITE_RETRIES", 0)?,
            airtable_write_batch_size: optional_number::<usize, _>(
                &lookup,
                "AIRTABLE_WRITE_BATCH_SIZE",
                AIRTABLE_MAX_WRITE_BATCH,
            )?
            .clamp(1, AIRTABLE_MAX_WRITE_BATCH),
            endpoints,
        })
    }
}

/// Seeds the process environment from `path`, or from `./.env` when no path is
/// given and that file exists. Variables already set are not overridden.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match path {
        Some(path) => dotenvy::from_path(path)
            .map(|_| Some(path.to_path_buf()))
            .map_err(|source| ConfigError::EnvFile {
                path: path.display().to_string(),
                source,
            }),
        None => match dotenvy::dotenv() {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.not_found() => Ok(None),
            Err(source) => Err(ConfigError::EnvFile {
                path: ".env".to_string(),
                source,
            }),
        },
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn optional_string<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_number<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: err.to_string(),
    })
}

/// Required counts must be positive.
fn required_number<T, F>(lookup: &F, key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = required(lookup, key)?;
    let value: T = parse_number(key, raw.clone())?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn optional_number<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|value| value.trim().to_string()) {
        Some(raw) if !raw.is_empty() => parse_number(key, raw),
        _ => Ok(default),
    }
}

fn optional_positive_number<T, F>(
    lookup: &F,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default + ToString,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = optional_number(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
