use crate::airtable::RecordStore;
use crate::config::{AIRTABLE_MAX_WRITE_BATCH, Config};
use crate::error::StoreError;
use crate::graph::retry::RetryPolicy;
use crate::models::{
    ChangedFields, ExternalRecord, NewRecordFields, RecordUpdate, format_store_date,
    normalize_address,
};
use crate::progress::{ProgressEvent, ProgressObserver, WriteKind};
use crate::sync::aggregate::RecipientStats;
use std::collections::HashMap;

/// What a sync would write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub inserts: Vec<NewRecordFields>,
    pub updates: Vec<RecordUpdate>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub kind: WriteKind,
    pub records: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub existing: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed_batches: Vec<BatchFailure>,
}

/// Splits fresh stats into inserts, updates and untouched rows.
///
/// Rows are matched on the normalized recipient address. Only the count and the
/// last interaction date (as a calendar date) decide whether a row changed.
pub fn plan(stats: &RecipientStats, existing: &[ExternalRecord]) -> SyncPlan {
    let mut by_address: HashMap<String, &ExternalRecord> = HashMap::with_capacity(existing.len());
    for record in existing {
        let Some(address) = record
            .fields
            .recipient_email
            .as_deref()
            .map(normalize_address)
            .filter(|address| !address.is_empty())
        else {
            log::warn!("ignoring record {} without a recipient email", record.id);
            continue;
        };
        if by_address.contains_key(&address) {
            log::warn!(
                "duplicate record {} for {}, keeping the first one",
                record.id,
                address
            );
            continue;
        }
        by_address.insert(address, record);
    }

    let mut plan = SyncPlan::default();
    for (address, stat) in stats {
        match by_address.get(address) {
            None => plan.inserts.push(NewRecordFields::from(stat)),
            Some(record) => {
                let date = stat.last_interacted_date();
                let differs = record.fields.total_sent != Some(stat.total_sent)
                    || record.fields.last_interacted_date() != Some(date);
                if differs {
                    plan.updates.push(RecordUpdate {
                        id: record.id.clone(),
                        fields: ChangedFields {
                            total_sent: stat.total_sent,
                            last_interacted: format_store_date(date),
                        },
                    });
                } else {
                    plan.unchanged += 1;
                }
            }
        }
    }

    plan
}

/// Writes a [`SyncPlan`] to a [`RecordStore`] in bounded batches.
pub struct RecordSyncer<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    batch_size: usize,
    write_retry: RetryPolicy,
    dry_run: bool,
}

impl<'a, S: RecordStore + ?Sized> RecordSyncer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_size: AIRTABLE_MAX_WRITE_BATCH,
            write_retry: RetryPolicy::no_retry(),
            dry_run: false,
        }
    }

    pub fn from_config(store: &'a S, config: &Config) -> Self {
        Self::new(store)
            .batch_size(config.airtable_write_batch_size)
            .write_retry(RetryPolicy::new(
                config.airtable_write_retries.saturating_add(1),
                config.retry_base_delay,
                config.retry_max_delay,
            ))
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, AIRTABLE_MAX_WRITE_BATCH);
        self
    }

    pub fn write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reads the table, diffs it against `stats` and writes the difference.
    ///
    /// A failed read aborts; a failed write batch is reported and skipped.
    pub async fn sync(
        &self,
        stats: &RecipientStats,
        observer: &dyn ProgressObserver,
    ) -> Result<SyncOutcome, StoreError> {
        let existing = self.store.list_records().await?;
        observer.on_progress(&ProgressEvent::ExistingLoaded {
            records: existing.len(),
        });

        let plan = plan(stats, &existing);
        observer.on_progress(&ProgressEvent::Planned {
            inserts: plan.inserts.len(),
            updates: plan.updates.len(),
            unchanged: plan.unchanged,
        });

        let mut outcome = SyncOutcome {
            existing: existing.len(),
            unchanged: plan.unchanged,
            ..SyncOutcome::default()
        };

        if plan.is_empty() {
            log::info!("table already up to date, nothing to write");
            return Ok(outcome);
        }

        if self.dry_run {
            log::info!(
                "dry run: skipping {} inserts and {} updates",
                plan.inserts.len(),
                plan.updates.len()
            );
            return Ok(outcome);
        }

        for batch in plan.inserts.chunks(self.batch_size) {
            let result = self
                .write_retry
                .run("airtable insert", |_| self.store.create_records(batch))
                .await;
            self.record_write(WriteKind::Insert, batch.len(), result, &mut outcome, observer);
        }

        for batch in plan.updates.chunks(self.batch_size) {
            let result = self
                .write_retry
                .run("airtable update", |_| self.store.update_records(batch))
                .await;
            self.record_write(WriteKind::Update, batch.len(), result, &mut outcome, observer);
        }

        Ok(outcome)
    }

    fn record_write(
        &self,
        kind: WriteKind,
        records: usize,
        result: Result<usize, crate::graph::RetryExhausted<StoreError>>,
        outcome: &mut SyncOutcome,
        observer: &dyn ProgressObserver,
    ) {
        match result {
            Ok(written) => {
                match kind {
                    WriteKind::Insert => outcome.inserted += written,
                    WriteKind::Update => outcome.updated += written,
                }
                observer.on_progress(&ProgressEvent::BatchWritten {
                    kind,
                    records: written,
                });
            }
            Err(exhausted) => {
                log::error!(
                    "{} batch of {} records failed after {} attempts: {}",
                    kind,
                    records,
                    exhausted.attempts,
                    exhausted.error
                );
                let reason = exhausted.error.to_string();
                observer.on_progress(&ProgressEvent::BatchFailed {
                    kind,
                    records,
                    reason: reason.clone(),
                });
                outcome.failed_batches.push(BatchFailure {
                    kind,
                    records,
                    reason,
                });
            }
        }
    }
}
