//! External record store.
//!
//! [`RecordStore`] is the seam the syncer writes through; [`AirtableClient`] is
//! the production implementation.

pub mod client;

pub use client::AirtableClient;

use crate::error::StoreError;
use crate::models::{ExternalRecord, NewRecordFields, RecordUpdate};
use async_trait::async_trait;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every row currently in the table.
    async fn list_records(&self) -> Result<Vec<ExternalRecord>, StoreError>;

    /// Creates one batch of rows, returning how many the store accepted.
    async fn create_records(&self, batch: &[NewRecordFields]) -> Result<usize, StoreError>;

    /// Rewrites one batch of rows, returning how many the store accepted.
    async fn update_records(&self, batch: &[RecordUpdate]) -> Result<usize, StoreError>;
}
