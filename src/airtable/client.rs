use super::RecordStore;
use crate::config::Config;
use crate::error::{StoreError, parse_retry_after};
use crate::models::{ExternalRecord, NewRecordFields, RecordUpdate};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Largest page Airtable serves on list calls.
const LIST_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<ExternalRecord>,
    offset: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    records: Vec<CreateRecord<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    fields: &'a NewRecordFields,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    records: &'a [RecordUpdate],
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

/// Airtable REST client bound to one table.
#[derive(Clone)]
pub struct AirtableClient {
    http: reqwest::Client,
    table_url: Url,
    api_key: String,
}

impl AirtableClient {
    pub fn new(http: reqwest::Client, config: &Config) -> Result<Self, StoreError> {
        let base = &config.endpoints.airtable_url;
        let mut table_url =
            Url::parse(base).map_err(|err| StoreError::Url(format!("{base}: {err}")))?;
        table_url
            .path_segments_mut()
            .map_err(|_| StoreError::Url(base.clone()))?
            .pop_if_empty()
            .extend([
                "v0",
                config.airtable_base_id.as_str(),
                config.airtable_table_name.as_str(),
            ]);

        Ok(Self {
            http,
            table_url,
            api_key: config.airtable_api_key.clone(),
        })
    }

    pub fn table_url(&self) -> &Url {
        &self.table_url
    }

    async fn send<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(StoreError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::status(status, body, retry_after));
        }

        let bytes = response.bytes().await.map_err(StoreError::Http)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn list_records(&self) -> Result<Vec<ExternalRecord>, StoreError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut url = self.table_url.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &LIST_PAGE_SIZE.to_string());
                if let Some(offset) = offset.as_deref() {
                    query.append_pair("offset", offset);
                }
            }

            let page: ListResponse = self.send(Method::GET, url, None::<&()>).await?;
            log::debug!("airtable page with {} records", page.records.len());
            records.extend(page.records);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn create_records(&self, batch: &[NewRecordFields]) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let payload = CreateRequest {
            records: batch.iter().map(|fields| CreateRecord { fields }).collect(),
        };
        let response: WriteResponse = self
            .send(Method::POST, self.table_url.clone(), Some(&payload))
            .await?;
        Ok(response.records.len())
    }

    async fn update_records(&self, batch: &[RecordUpdate]) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let payload = UpdateRequest { records: batch };
        let response: WriteResponse = self
            .send(Method::PATCH, self.table_url.clone(), Some(&payload))
            .await?;
        Ok(response.records.len())
    }
}
