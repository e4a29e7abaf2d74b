//! Progress reporting for a sync run.
//!
//! Components never talk to a UI or log sink directly. They emit
//! [`ProgressEvent`]s to an injected [`ProgressObserver`]; the binary plugs in
//! [`LogProgress`], embedders can pass a closure or keep a [`ProgressHistory`].

use chrono::Local;
use parking_lot::Mutex;
use std::fmt;

/// Which kind of write a batch carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteKind::Insert => write!(f, "insert"),
            WriteKind::Update => write!(f, "update"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { run_id: String },
    Authenticated,
    Counted { total: u64, pages: usize },
    PageFetched { page: usize, records: usize, fetched_so_far: usize },
    PageFailed { page: usize, attempts: u32, reason: String },
    FetchFinished { records: usize, failed_pages: usize },
    Aggregated { recipients: usize, domains: usize, malformed: usize },
    ExistingLoaded { records: usize },
    Planned { inserts: usize, updates: usize, unchanged: usize },
    BatchWritten { kind: WriteKind, records: usize },
    BatchFailed { kind: WriteKind, records: usize, reason: String },
    Finished { inserted: usize, updated: usize, dry_run: bool },
}

impl ProgressEvent {
    /// Events describing lost data rather than normal progress.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProgressEvent::PageFailed { .. } | ProgressEvent::BatchFailed { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { run_id } => write!(f, "starting sent items sync (run {run_id})"),
            ProgressEvent::Authenticated => write!(f, "access token acquired"),
            ProgressEvent::Counted { total, pages } => {
                write!(f, "total emails in sent folder: {total} ({pages} pages)")
            }
            ProgressEvent::PageFetched {
                page,
                records,
                fetched_so_far,
            } => write!(
                f,
                "page {page} fetched with {records} emails, {fetched_so_far} emails so far"
            ),
            ProgressEvent::PageFailed {
                page,
                attempts,
                reason,
            } => write!(f, "page {page} dropped after {attempts} attempts: {reason}"),
            ProgressEvent::FetchFinished {
                records,
                failed_pages,
            } => write!(f, "fetched {records} emails, {failed_pages} pages failed"),
            ProgressEvent::Aggregated {
                recipients,
                domains,
                malformed,
            } => write!(
                f,
                "aggregated {recipients} recipients across {domains} domains ({malformed} without a domain)"
            ),
            ProgressEvent::ExistingLoaded { records } => {
                write!(f, "found {records} existing records")
            }
            ProgressEvent::Planned {
                inserts,
                updates,
                unchanged,
            } => write!(
                f,
                "{inserts} new records, {updates} changed records, {unchanged} unchanged"
            ),
            ProgressEvent::BatchWritten { kind, records } => match kind {
                WriteKind::Insert => write!(f, "uploaded {records} new records"),
                WriteKind::Update => write!(f, "updated {records} records"),
            },
            ProgressEvent::BatchFailed {
                kind,
                records,
                reason,
            } => write!(f, "{kind} batch of {records} records failed: {reason}"),
            ProgressEvent::Finished {
                inserted,
                updated,
                dry_run,
            } => {
                if *dry_run {
                    write!(f, "dry run complete, nothing written")
                } else {
                    write!(f, "sync complete: {inserted} new records, {updated} updated records")
                }
            }
        }
    }
}

/// Receives progress events. Implementations must be cheap and must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        if event.is_failure() {
            log::warn!("{}", event);
        } else {
            log::info!("{}", event);
        }
    }
}

/// Keeps every event as a `[HH:MM:SS] message` line.
#[derive(Debug, Default)]
pub struct ProgressHistory {
    lines: Mutex<Vec<String>>,
}

impl ProgressHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ProgressObserver for ProgressHistory {
    fn on_progress(&self, event: &ProgressEvent) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), event);
        self.lines.lock().push(line);
    }
}
