//! Run statistics.

use crate::graph::FetchOutcome;
use crate::sync::diff::{BatchFailure, SyncOutcome};
use std::fmt;

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub run_id: String,
    /// `totalItemCount` of the Sent Items folder
    pub total_in_folder: u64,
    pub pages: usize,
    /// Zero-based indexes of pages dropped after retries
    pub failed_pages: Vec<usize>,
    pub records_fetched: usize,
    /// Messages skipped for lack of a usable timestamp
    pub malformed_records: usize,
    pub recipients: usize,
    /// Recipients whose address has no domain
    pub malformed_addresses: usize,
    pub domains: usize,
    pub existing_records: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed_batches: Vec<BatchFailure>,
    pub dry_run: bool,
}

impl SyncReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    pub fn record_fetch(&mut self, fetch: &FetchOutcome) {
        self.total_in_folder = fetch.total_in_folder;
        self.pages = fetch.pages;
        self.failed_pages = fetch.failed_pages.clone();
        self.records_fetched = fetch.records.len();
        self.malformed_records = fetch.malformed;
    }

    pub fn record_sync(&mut self, outcome: SyncOutcome) {
        self.existing_records = outcome.existing;
        self.inserted = outcome.inserted;
        self.updated = outcome.updated;
        self.unchanged = outcome.unchanged;
        self.failed_batches = outcome.failed_batches;
    }

    /// Whether some data could not be fetched or written.
    pub fn is_partial(&self) -> bool {
        !self.failed_pages.is_empty() || !self.failed_batches.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}:", self.run_id)?;
        writeln!(
            f,
            "  fetched: {} of {} emails ({} pages, {} failed)",
            self.records_fetched,
            self.total_in_folder,
            self.pages,
            self.failed_pages.len()
        )?;
        writeln!(
            f,
            "  recipients: {} across {} domains ({} without a domain)",
            self.recipients, self.domains, self.malformed_addresses
        )?;
        writeln!(
            f,
            "  records: {} new, {} updated, {} unchanged{}",
            self.inserted,
            self.updated,
            self.unchanged,
            if self.dry_run { " (dry run)" } else { "" }
        )?;
        write!(f, "  failed write batches: {}", self.failed_batches.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::WriteKind;

    #[test]
    fn partial_runs_are_detected() {
        let mut report = SyncReport::new("abc");
        assert!(!report.is_partial());

        report.failed_pages.push(3);
        assert!(report.is_partial());

        let mut report = SyncReport::new("def");
        report.record_sync(SyncOutcome {
            failed_batches: vec![BatchFailure {
                kind: WriteKind::Update,
                records: 10,
                reason: "boom".into(),
            }],
            ..SyncOutcome::default()
        });
        assert!(report.is_partial());
    }

    #[test]
    fn display_summarizes_counts() {
        let report = SyncReport {
            run_id: "1a2b3c4d".into(),
            total_in_folder: 120,
            pages: 3,
            records_fetched: 100,
            failed_pages: vec![2],
            recipients: 40,
            domains: 12,
            inserted: 5,
            updated: 2,
            unchanged: 33,
            ..SyncReport::default()
        };

        let text = report.to_string();
        assert!(text.starts_with("run 1a2b3c4d:"));
        assert!(text.contains("fetched: 100 of 120 emails (3 pages, 1 failed)"));
        assert!(text.contains("records: 5 new, 2 updated, 33 unchanged"));
    }
}
