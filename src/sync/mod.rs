//! Sent items → record store synchronization.
//!
//! # Pipeline
//!
//! A run is a single pass through four phases:
//!
//! 1. **Authenticate**: exchange the client credentials for a Graph token
//!    ([`crate::graph::TokenCache`]). The token is refreshed during the fetch
//!    when it nears expiry or Graph rejects it.
//! 2. **Fetch**: count the Sent Items folder, split it into pages of
//!    `BATCH_SIZE` and fetch them with at most `MAX_WORKERS` in flight
//!    ([`crate::graph::EmailFetcher`]). Pages that keep failing are dropped.
//! 3. **Aggregate**: fold the messages into one [`RecipientStat`] per address
//!    ([`aggregate`]).
//! 4. **Sync**: diff the stats against the rows already in the store and write
//!    inserts and updates in batches ([`diff::RecordSyncer`]).
//!
//! Every phase reports through a [`ProgressObserver`].
//!
//! # Failure model
//!
//! Configuration, authentication, the folder count and the store read are
//! fatal. Dropped pages, malformed messages and failed write batches only make
//! the run partial; the [`SyncReport`] says what was lost. Reruns are safe:
//! the diff only writes rows whose values changed.
//!
//! [`RecipientStat`]: crate::models::RecipientStat

pub mod aggregate;
pub mod diff;
pub mod stats;

pub use aggregate::{RecipientStats, aggregate, merge_stats, summarize_domains};
pub use diff::{RecordSyncer, SyncOutcome, SyncPlan, plan};
pub use stats::SyncReport;

use crate::airtable::{AirtableClient, RecordStore};
use crate::config::Config;
use crate::error::SyncError;
use crate::graph::{EmailFetcher, FetchOptions, TokenCache, TokenProvider};
use crate::progress::{ProgressEvent, ProgressObserver};
use std::time::Duration;
use uuid::Uuid;

/// Tokens this close to expiry are replaced before the next Graph request.
const TOKEN_REFRESH_GRACE_SECS: i64 = 300;

/// Builds the HTTP client shared by every phase.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client, SyncError> {
    reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("sentmail-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(SyncError::Client)
}

/// Runs authenticate → fetch → aggregate → sync for one mailbox.
pub struct SyncPipeline<'a> {
    config: &'a Config,
    observer: &'a dyn ProgressObserver,
    dry_run: bool,
}

impl<'a> SyncPipeline<'a> {
    pub fn new(config: &'a Config, observer: &'a dyn ProgressObserver) -> Self {
        Self {
            config,
            observer,
            dry_run: false,
        }
    }

    /// Plan the store changes without writing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Runs against the configured Airtable table.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let http = build_http_client(self.config)?;
        let store = AirtableClient::new(http.clone(), self.config)
            .map_err(|err| SyncError::Endpoint(err.to_string()))?;
        self.execute(http, &store).await
    }

    /// Runs against any record store.
    pub async fn run_with_store<S>(&self, store: &S) -> Result<SyncReport, SyncError>
    where
        S: RecordStore + ?Sized,
    {
        let http = build_http_client(self.config)?;
        self.execute(http, store).await
    }

    async fn execute<S>(&self, http: reqwest::Client, store: &S) -> Result<SyncReport, SyncError>
    where
        S: RecordStore + ?Sized,
    {
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let mut report = SyncReport::new(run_id.clone());
        report.dry_run = self.dry_run;

        log::info!(
            "run {}: syncing sent items of {} into {}/{}",
            run_id,
            self.config.mailbox_address,
            self.config.airtable_base_id,
            self.config.airtable_table_name
        );
        self.observer
            .on_progress(&ProgressEvent::Started { run_id: run_id.clone() });

        // Phase 1: token
        let tokens = TokenCache::new(
            TokenProvider::new(http.clone(), self.config),
            chrono::Duration::seconds(TOKEN_REFRESH_GRACE_SECS),
        );
        tokens
            .token()
            .await
            .inspect_err(|err| log::error!("run {}: authentication failed: {}", run_id, err))?;
        self.observer.on_progress(&ProgressEvent::Authenticated);

        // Phase 2: fetch
        let fetcher = EmailFetcher::new(http, self.config)
            .map_err(|err| SyncError::Endpoint(err.to_string()))?;
        let options = FetchOptions::from_config(self.config);
        let fetch = fetcher.fetch_all(&tokens, &options, self.observer).await?;
        report.record_fetch(&fetch);
        log::info!(
            "run {}: fetched {} emails from {} pages ({} failed)",
            run_id,
            fetch.records.len(),
            fetch.pages,
            fetch.failed_pages.len()
        );

        // Phase 3: aggregate
        let stats = aggregate(&fetch.records);
        drop(fetch);
        let domains = summarize_domains(&stats);
        report.recipients = stats.len();
        report.domains = domains.len();
        report.malformed_addresses = stats.values().filter(|stat| stat.domain.is_none()).count();
        self.observer.on_progress(&ProgressEvent::Aggregated {
            recipients: report.recipients,
            domains: report.domains,
            malformed: report.malformed_addresses,
        });

        // Phase 4: diff and write
        let outcome = RecordSyncer::from_config(store, self.config)
            .dry_run(self.dry_run)
            .sync(&stats, self.observer)
            .await
            .map_err(SyncError::StoreRead)?;
        report.record_sync(outcome);

        self.observer.on_progress(&ProgressEvent::Finished {
            inserted: report.inserted,
            updated: report.updated,
            dry_run: self.dry_run,
        });
        log::info!(
            "run {}: {} new, {} updated, {} unchanged, {} failed batches",
            run_id,
            report.inserted,
            report.updated,
            report.unchanged,
            report.failed_batches.len()
        );

        Ok(report)
    }
}
