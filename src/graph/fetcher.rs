use crate::config::Config;
use crate::error::{GraphError, MalformedRecord, SyncError, parse_retry_after};
use crate::graph::auth::{AccessToken, TokenCache};
use crate::graph::retry::RetryPolicy;
use crate::models::{EmailRecord, Recipient};
use crate::progress::{ProgressEvent, ProgressObserver};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;

const MESSAGE_FIELDS: &str =
    "id,subject,sentDateTime,receivedDateTime,toRecipients,ccRecipients,bccRecipients";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderInfo {
    #[serde(default)]
    total_item_count: u64,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

/// A message as returned by the Graph `messages` listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    #[serde(default)]
    pub id: String,
    pub subject: Option<String>,
    pub sent_date_time: Option<String>,
    pub received_date_time: Option<String>,
    pub to_recipients: Option<Vec<GraphRecipient>>,
    pub cc_recipients: Option<Vec<GraphRecipient>>,
    pub bcc_recipients: Option<Vec<GraphRecipient>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRecipient {
    pub email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphEmailAddress {
    pub address: Option<String>,
    pub name: Option<String>,
}

impl TryFrom<GraphMessage> for EmailRecord {
    type Error = MalformedRecord;

    fn try_from(message: GraphMessage) -> Result<Self, Self::Error> {
        let raw = message
            .sent_date_time
            .or(message.received_date_time)
            .ok_or_else(|| MalformedRecord::MissingTimestamp {
                id: message.id.clone(),
            })?;
        let sent_at = DateTime::parse_from_rfc3339(&raw)
            .map(|value| value.with_timezone(&Utc))
            .map_err(|_| MalformedRecord::InvalidTimestamp {
                id: message.id.clone(),
                value: raw.clone(),
            })?;

        let recipients = [
            message.to_recipients,
            message.cc_recipients,
            message.bcc_recipients,
        ]
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|recipient| recipient.email_address)
        .filter_map(|email| {
            email.address.map(|address| Recipient {
                address,
                name: email.name,
            })
        });

        Ok(EmailRecord::new(message.id, sent_at, recipients, message.subject))
    }
}

/// Paging and concurrency knobs for one fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub batch_size: usize,
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_workers: config.max_workers.max(1),
            retry: RetryPolicy::new(
                config.max_retries,
                config.retry_base_delay,
                config.retry_max_delay,
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub total_in_folder: u64,
    pub pages: usize,
    /// Records of every page that succeeded, in completion order.
    pub records: Vec<EmailRecord>,
    /// Zero-based indexes of dropped pages, ascending.
    pub failed_pages: Vec<usize>,
    pub malformed: usize,
}

/// Reads the Sent Items folder of one mailbox.
pub struct EmailFetcher {
    http: reqwest::Client,
    folder_url: Url,
}

impl EmailFetcher {
    pub fn new(http: reqwest::Client, config: &Config) -> Result<Self, GraphError> {
        let mut folder_url = Url::parse(&config.endpoints.graph_url)
            .map_err(|err| GraphError::Url(format!("{}: {err}", config.endpoints.graph_url)))?;
        folder_url
            .path_segments_mut()
            .map_err(|_| GraphError::Url(config.endpoints.graph_url.clone()))?
            .pop_if_empty()
            .extend(["users", config.mailbox_address.as_str(), "mailFolders", "SentItems"]);

        Ok(Self { http, folder_url })
    }

    /// Number of messages in the folder.
    pub async fn count_sent(&self, tokens: &TokenCache) -> Result<u64, GraphError> {
        let info: FolderInfo = self.get_json(self.folder_url.clone(), tokens).await?;
        Ok(info.total_item_count)
    }

    /// One page of `batch_size` messages starting at `page * batch_size`.
    pub async fn fetch_page(
        &self,
        tokens: &TokenCache,
        page: usize,
        batch_size: usize,
    ) -> Result<Vec<GraphMessage>, GraphError> {
        let mut url = self.folder_url.clone();
        url.path_segments_mut()
            .map_err(|_| GraphError::Url(self.folder_url.to_string()))?
            .push("messages");
        url.query_pairs_mut()
            .append_pair("$top", &batch_size.to_string())
            .append_pair("$skip", &(page * batch_size).to_string())
            .append_pair("$select", MESSAGE_FIELDS);

        let page: MessagePage = self.get_json(url, tokens).await?;
        Ok(page.value)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        tokens: &TokenCache,
    ) -> Result<T, GraphError> {
        let token = tokens.token().await.map_err(GraphError::Auth)?;
        let result = self.send_get(url, &token).await;
        if result.as_ref().is_err_and(GraphError::is_unauthorized) {
            tokens.invalidate(&token).await;
        }
        result
    }

    async fn send_get<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &AccessToken,
    ) -> Result<T, GraphError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(GraphError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::status(status, body, retry_after));
        }

        let body = response.bytes().await.map_err(GraphError::Http)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Counts the folder, then fetches every page with at most `max_workers` in flight.
    ///
    /// Pages that still fail after the retry budget are dropped and reported; only a
    /// failed count aborts.
    pub async fn fetch_all(
        &self,
        tokens: &TokenCache,
        options: &FetchOptions,
        observer: &dyn ProgressObserver,
    ) -> Result<FetchOutcome, SyncError> {
        let total = options
            .retry
            .run("count sent items", |_| self.count_sent(tokens))
            .await
            .map_err(|exhausted| SyncError::Count(exhausted.error))?;

        let batch_size = options.batch_size.max(1);
        let pages = usize::try_from(total).unwrap_or(usize::MAX).div_ceil(batch_size);
        observer.on_progress(&ProgressEvent::Counted { total, pages });

        let mut outcome = FetchOutcome {
            total_in_folder: total,
            pages,
            ..FetchOutcome::default()
        };

        let mut results = stream::iter(0..pages)
            .map(move |page| async move {
                let label = format!("page {page}");
                let result = options
                    .retry
                    .run(&label, |_| self.fetch_page(tokens, page, batch_size))
                    .await;
                (page, result)
            })
            .buffer_unordered(options.max_workers.max(1));

        while let Some((page, result)) = results.next().await {
            match result {
                Ok(messages) => {
                    let count = messages.len();
                    for message in messages {
                        match EmailRecord::try_from(message) {
                            Ok(record) => outcome.records.push(record),
                            Err(err) => {
                                log::warn!("skipping malformed message: {}", err);
                                outcome.malformed += 1;
                            }
                        }
                    }
                    log::debug!("page {} fetched with {} messages", page, count);
                    observer.on_progress(&ProgressEvent::PageFetched {
                        page,
                        records: count,
                        fetched_so_far: outcome.records.len(),
                    });
                }
                Err(exhausted) => {
                    log::warn!(
                        "page {} dropped after {} attempts: {}",
                        page,
                        exhausted.attempts,
                        exhausted.error
                    );
                    observer.on_progress(&ProgressEvent::PageFailed {
                        page,
                        attempts: exhausted.attempts,
                        reason: exhausted.error.to_string(),
                    });
                    outcome.failed_pages.push(page);
                }
            }
        }

        outcome.failed_pages.sort_unstable();
        observer.on_progress(&ProgressEvent::FetchFinished {
            records: outcome.records.len(),
            failed_pages: outcome.failed_pages.len(),
        });

        Ok(outcome)
    }
}
