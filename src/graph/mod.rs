//! Microsoft Graph access: token exchange, Sent Items paging, retry policy.

pub mod auth;
pub mod fetcher;
pub mod retry;

pub use auth::{AccessToken, TokenCache, TokenProvider};
pub use fetcher::{EmailFetcher, FetchOptions, FetchOutcome};
pub use retry::{RetryExhausted, RetryPolicy, Retryable};
