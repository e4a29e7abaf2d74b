//! Mock Microsoft identity, Graph and Airtable endpoints on one wiremock server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sentmail_sync::Config;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const TENANT: &str = "tenant-1";
pub const MAILBOX: &str = "sales@example.com";
pub const ACCESS_TOKEN: &str = "mock-access-token";
pub const SENT_ITEMS: &str = "/v1.0/users/sales@example.com/mailFolders/SentItems";
pub const SENT_MESSAGES: &str = "/v1.0/users/sales@example.com/mailFolders/SentItems/messages";
pub const TABLE: &str = "/v0/app123/Stats";

/// A Graph message sent at `sent_at` to every address in `to`.
pub fn message(id: &str, sent_at: &str, to: &[(&str, &str)]) -> Value {
    let recipients: Vec<Value> = to
        .iter()
        .map(|(address, name)| json!({ "emailAddress": { "address": address, "name": name } }))
        .collect();
    json!({
        "id": id,
        "subject": format!("subject {id}"),
        "sentDateTime": sent_at,
        "toRecipients": recipients,
        "ccRecipients": [],
        "bccRecipients": []
    })
}

/// An Airtable row as returned by the list endpoint.
pub fn airtable_row(id: &str, email: &str, total: u64, date: &str) -> Value {
    json!({
        "id": id,
        "createdTime": "2024-01-01T00:00:00.000Z",
        "fields": {
            "Recipient Email": email,
            "Company / Management": email.rsplit_once('@').map(|(_, d)| d).unwrap_or("unknown"),
            "Total Mails Sent": total,
            "Last Interacted Date": date
        }
    })
}

/// Echoes the written records back the way Airtable does.
fn echo_records(request: &Request) -> ResponseTemplate {
    let body: Value = request.body_json().unwrap_or_default();
    let records: Vec<Value> = body["records"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let id = record
                .get("id")
                .cloned()
                .unwrap_or_else(|| json!(format!("recNew{i}")));
            json!({ "id": id, "fields": record["fields"].clone() })
        })
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({ "records": records }))
}

pub struct MockServices {
    pub server: MockServer,
}

impl MockServices {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn env(&self) -> HashMap<&'static str, String> {
        let uri = self.server.uri();
        HashMap::from([
            ("TENANT_ID", TENANT.to_string()),
            ("CLIENT_ID", "client-1".to_string()),
            ("CLIENT_SECRET", "secret-1".to_string()),
            ("MAILBOX_ADDRESS", MAILBOX.to_string()),
            ("BATCH_SIZE", "2".to_string()),
            ("MAX_WORKERS", "2".to_string()),
            ("MAX_RETRIES", "3".to_string()),
            ("RETRY_BASE_DELAY_MS", "1".to_string()),
            ("RETRY_MAX_DELAY_MS", "5".to_string()),
            ("HTTP_TIMEOUT_SECS", "5".to_string()),
            ("AIRTABLE_API_KEY", "airtable-key".to_string()),
            ("AIRTABLE_BASE_ID", "app123".to_string()),
            ("AIRTABLE_TABLE_NAME", "Stats".to_string()),
            ("LOGIN_URL", uri.clone()),
            ("GRAPH_API_URL", format!("{uri}/v1.0")),
            ("AIRTABLE_API_URL", uri),
        ])
    }

    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    pub fn config_with(&self, overrides: &[(&'static str, &str)]) -> Config {
        let mut env = self.env();
        for &(key, value) in overrides {
            env.insert(key, value.to_string());
        }
        Config::from_lookup(|key| env.get(key).cloned()).expect("valid test config")
    }

    pub async fn mock_token(&self) {
        Mock::given(method("POST"))
            .and(path(format!("/{TENANT}/oauth2/v2.0/token")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": ACCESS_TOKEN
            })))
            .mount(&self.server)
            .await;
    }

    /// Hands out `tokens` in order, repeating the last one once they run out.
    pub async fn mock_token_sequence(&self, tokens: Vec<(&'static str, u64)>) {
        let issued = AtomicUsize::new(0);
        Mock::given(method("POST"))
            .and(path(format!("/{TENANT}/oauth2/v2.0/token")))
            .respond_with(move |_: &Request| {
                let next = issued.fetch_add(1, Ordering::SeqCst).min(tokens.len() - 1);
                let (token, expires_in) = tokens[next];
                ResponseTemplate::new(200).set_body_json(json!({
                    "token_type": "Bearer",
                    "expires_in": expires_in,
                    "access_token": token
                }))
            })
            .mount(&self.server)
            .await;
    }

    pub async fn token_requests(&self) -> usize {
        self.request_count("POST", &format!("/{TENANT}/oauth2/v2.0/token"))
            .await
    }

    pub async fn mock_sent_count(&self, total: u64) {
        Mock::given(method("GET"))
            .and(path(SENT_ITEMS))
            .and(header("authorization", format!("Bearer {ACCESS_TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "AAMkSent",
                "displayName": "Sent Items",
                "totalItemCount": total
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_page(&self, skip: usize, messages: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(SENT_MESSAGES))
            .and(query_param("$skip", skip.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": messages })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_slow_page(&self, skip: usize, messages: Vec<Value>, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(SENT_MESSAGES))
            .and(query_param("$skip", skip.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "value": messages }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// A page that always answers with `status`, expected exactly `calls` times.
    pub async fn mock_failing_page(&self, skip: usize, status: u16, calls: u64) {
        Mock::given(method("GET"))
            .and(path(SENT_MESSAGES))
            .and(query_param("$skip", skip.to_string()))
            .respond_with(ResponseTemplate::new(status))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_airtable_rows(&self, rows: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(TABLE))
            .and(query_param("pageSize", "100"))
            .and(query_param_is_missing("offset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": rows })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_airtable_writes(&self) {
        for verb in ["POST", "PATCH"] {
            Mock::given(method(verb))
                .and(path(TABLE))
                .and(header("authorization", "Bearer airtable-key"))
                .respond_with(echo_records)
                .mount(&self.server)
                .await;
        }
    }

    /// JSON bodies of every request received with `verb`, in arrival order.
    pub async fn bodies(&self, verb: &str) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.method.to_string() == verb)
            .filter_map(|request| request.body_json::<Value>().ok())
            .collect()
    }

    pub async fn request_count(&self, verb: &str, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.method.to_string() == verb && request.url.path() == request_path)
            .count()
    }
}
