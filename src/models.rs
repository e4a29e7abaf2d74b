use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Written to the company column when a recipient address has no domain.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Canonical form of an address: trimmed and lowercased.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Text after the last `@`, or `None` for malformed addresses.
pub fn domain_of(address: &str) -> Option<String> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub name: Option<String>,
}

/// A sent message reduced to what aggregation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub id: String,
    pub sent_at: DateTime<Utc>,
    /// To, then cc, then bcc; one entry per normalized address.
    pub recipients: Vec<Recipient>,
    pub subject: Option<String>,
}

impl EmailRecord {
    /// Builds a record, normalizing addresses and dropping duplicates and blanks.
    pub fn new<I>(
        id: impl Into<String>,
        sent_at: DateTime<Utc>,
        recipients: I,
        subject: Option<String>,
    ) -> Self
    where
        I: IntoIterator<Item = Recipient>,
    {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<Recipient> = Vec::new();
        for recipient in recipients {
            let address = normalize_address(&recipient.address);
            if address.is_empty() {
                continue;
            }
            let name = recipient
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty());
            match positions.get(&address).copied() {
                // First occurrence keeps its place; a later one may supply the name.
                Some(index) => {
                    if unique[index].name.is_none() {
                        unique[index].name = name;
                    }
                }
                None => {
                    positions.insert(address.clone(), unique.len());
                    unique.push(Recipient { address, name });
                }
            }
        }

        Self {
            id: id.into(),
            sent_at,
            recipients: unique,
            subject,
        }
    }
}

/// Per-recipient statistics for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientStat {
    pub address: String,
    pub total_sent: u64,
    pub last_interacted: DateTime<Utc>,
    pub domain: Option<String>,
    pub name: Option<String>,
    #[serde(skip)]
    name_seen_at: Option<DateTime<Utc>>,
}

impl RecipientStat {
    pub fn new(address: String, sent_at: DateTime<Utc>, name: Option<String>) -> Self {
        let domain = domain_of(&address);
        let name_seen_at = name.as_ref().map(|_| sent_at);
        Self {
            address,
            total_sent: 1,
            last_interacted: sent_at,
            domain,
            name,
            name_seen_at,
        }
    }

    /// Counts one more message sent at `sent_at`.
    pub fn observe(&mut self, sent_at: DateTime<Utc>, name: Option<String>) {
        self.total_sent += 1;
        self.last_interacted = self.last_interacted.max(sent_at);
        if let Some(name) = name {
            self.absorb_name(name, sent_at);
        }
    }

    /// Folds another stat for the same address into this one.
    pub fn merge(&mut self, other: RecipientStat) {
        self.total_sent += other.total_sent;
        self.last_interacted = self.last_interacted.max(other.last_interacted);
        if let (Some(name), Some(seen_at)) = (other.name, other.name_seen_at) {
            self.absorb_name(name, seen_at);
        }
    }

    /// Keeps the name from the newest message that carried one. Equal timestamps keep
    /// the smaller name so the result does not depend on arrival order.
    fn absorb_name(&mut self, name: String, seen_at: DateTime<Utc>) {
        let replace = match (&self.name, self.name_seen_at) {
            (Some(current), Some(current_at)) => {
                seen_at > current_at || (seen_at == current_at && name < *current)
            }
            _ => true,
        };
        if replace {
            self.name = Some(name);
            self.name_seen_at = Some(seen_at);
        }
    }

    pub fn last_interacted_date(&self) -> NaiveDate {
        self.last_interacted.date_naive()
    }

    pub fn company(&self) -> &str {
        self.domain.as_deref().unwrap_or(UNKNOWN_DOMAIN)
    }
}

/// Recipients sharing one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainSummary {
    pub domain: String,
    pub recipients: usize,
    pub total_sent: u64,
    pub last_interacted: DateTime<Utc>,
}

/// A row as it exists in the record store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalRecord {
    pub id: String,
    #[serde(default)]
    pub fields: ExternalFields,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExternalFields {
    #[serde(rename = "Recipient Email", default)]
    pub recipient_email: Option<String>,
    #[serde(rename = "Company / Management", default)]
    pub company: Option<String>,
    #[serde(rename = "Total Mails Sent", default, deserialize_with = "lenient_count")]
    pub total_sent: Option<u64>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Last Interacted Date", default)]
    pub last_interacted: Option<String>,
}

impl ExternalFields {
    pub fn last_interacted_date(&self) -> Option<NaiveDate> {
        self.last_interacted.as_deref().and_then(parse_store_date)
    }
}

/// Full field set written when a recipient is new to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRecordFields {
    #[serde(rename = "Recipient Email")]
    pub recipient_email: String,
    #[serde(rename = "Company / Management")]
    pub company: String,
    #[serde(rename = "Total Mails Sent")]
    pub total_sent: u64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Last Interacted Date")]
    pub last_interacted: String,
}

impl From<&RecipientStat> for NewRecordFields {
    fn from(stat: &RecipientStat) -> Self {
        Self {
            recipient_email: stat.address.clone(),
            company: stat.company().to_string(),
            total_sent: stat.total_sent,
            name: stat.name.clone().unwrap_or_default(),
            last_interacted: format_store_date(stat.last_interacted_date()),
        }
    }
}

/// Fields rewritten on an existing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedFields {
    #[serde(rename = "Total Mails Sent")]
    pub total_sent: u64,
    #[serde(rename = "Last Interacted Date")]
    pub last_interacted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: ChangedFields,
}

pub fn format_store_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and full RFC 3339 timestamps.
pub fn parse_store_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|value| value.with_timezone(&Utc).date_naive())
        })
}

/// Number columns come back as integers, floats, or occasionally strings.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|value| *value >= 0.0 && value.fract() == 0.0)
                .map(|value| value as u64)
        }),
        Some(serde_json::Value::String(text)) => text.trim().parse::<u64>().ok(),
        _ => None,
    })
}
