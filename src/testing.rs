//! Fixtures shared by unit tests.

use crate::airtable::RecordStore;
use crate::config::{Config, Endpoints};
use crate::error::StoreError;
use crate::models::{ExternalFields, ExternalRecord, NewRecordFields, RecordUpdate};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::time::Duration;

pub fn config(graph_url: &str) -> Config {
    Config {
        tenant_id: "tenant".into(),
        client_id: "client".into(),
        client_secret: "secret".into(),
        mailbox_address: "sales@example.com".into(),
        batch_size: 2,
        max_workers: 2,
        max_retries: 3,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        http_timeout: Duration::from_secs(5),
        airtable_api_key: "key".into(),
        airtable_base_id: "app123".into(),
        airtable_table_name: "Stats".into(),
        airtable_write_retries: 0,
        airtable_write_batch_size: 10,
        endpoints: Endpoints {
            login_url: "http://login.test".into(),
            graph_url: graph_url.into(),
            airtable_url: "http://airtable.test".into(),
        },
    }
}

/// In-memory table that remembers the size of every accepted write.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ExternalRecord>>,
    create_batches: Mutex<Vec<usize>>,
    update_batches: Mutex<Vec<usize>>,
    failing_creates: Mutex<usize>,
}

impl MemoryStore {
    /// Rejects the next `count` create calls.
    pub fn fail_creates(self, count: usize) -> Self {
        *self.failing_creates.lock() = count;
        self
    }

    pub fn create_batch_sizes(&self) -> Vec<usize> {
        self.create_batches.lock().clone()
    }

    pub fn update_batch_sizes(&self) -> Vec<usize> {
        self.update_batches.lock().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_records(&self) -> Result<Vec<ExternalRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }

    async fn create_records(&self, batch: &[NewRecordFields]) -> Result<usize, StoreError> {
        {
            let mut failing = self.failing_creates.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::status(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "rejected".into(),
                    None,
                ));
            }
        }

        let mut records = self.records.lock();
        for fields in batch {
            let id = format!("rec{}", records.len() + 1);
            records.push(ExternalRecord {
                id,
                fields: ExternalFields {
                    recipient_email: Some(fields.recipient_email.clone()),
                    company: Some(fields.company.clone()),
                    total_sent: Some(fields.total_sent),
                    name: Some(fields.name.clone()),
                    last_interacted: Some(fields.last_interacted.clone()),
                },
            });
        }
        self.create_batches.lock().push(batch.len());
        Ok(batch.len())
    }

    async fn update_records(&self, batch: &[RecordUpdate]) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        for update in batch {
            if let Some(record) = records.iter_mut().find(|record| record.id == update.id) {
                record.fields.total_sent = Some(update.fields.total_sent);
                record.fields.last_interacted = Some(update.fields.last_interacted.clone());
            }
        }
        self.update_batches.lock().push(batch.len());
        Ok(batch.len())
    }
}
