//! Wire and row types for captured browser traffic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::session_management::types::short_hash;

/// A network request captured by the browser extension, as it arrives on the
/// wire. Field names are camelCase to match the extension payloads; anything
/// beyond the URL is optional because extensions differ in what they report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapturedRequest {
    pub url: String,
    pub method: Option<String>,
    pub request_headers: Map<String, Value>,
    /// Body as sent by the extension; strings usually, objects for form data.
    pub request_body: Option<Value>,
    pub response_headers: Map<String, Value>,
    pub response_body: Option<Value>,
    pub status_code: Option<i64>,
    /// Timestamp as reported by the extension, shape unspecified.
    pub timestamp: Option<Value>,
}

impl CapturedRequest {
    /// The raw timestamp rendered as text, empty when absent. Feeds the
    /// request id hash, so the rendering must be stable.
    pub fn raw_timestamp(&self) -> String {
        match &self.timestamp {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Parsed capture time, falling back to now when the extension sent
    /// nothing parseable.
    pub fn timestamp_or_now(&self) -> DateTime<Utc> {
        if let Some(Value::String(s)) = &self.timestamp {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return parsed.with_timezone(&Utc);
            }
        }
        Utc::now()
    }

    pub fn request_body_string(&self) -> String {
        value_to_text(self.request_body.as_ref())
    }

    pub fn response_body_string(&self) -> String {
        value_to_text(self.response_body.as_ref())
    }

    /// Host portion of the URL (`scheme://host/...` -> `host`), including a
    /// port when present.
    pub fn domain(&self) -> Option<String> {
        domain_of(&self.url)
    }
}

/// Host portion of an absolute URL, `None` when the URL has no authority.
pub fn domain_of(url: &str) -> Option<String> {
    let host = url.split('/').nth(2)?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn value_to_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// A captured request as persisted in the `captured_requests` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRequest {
    pub id: String,
    pub session_id: Option<String>,
    pub url: String,
    pub method: Option<String>,
    #[serde(default)]
    pub request_headers: Map<String, Value>,
    #[serde(default)]
    pub request_body: String,
    #[serde(default)]
    pub response_headers: Map<String, Value>,
    #[serde(default)]
    pub response_body: String,
    pub status_code: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl StoredRequest {
    /// Build the row for a captured request. The id is the first 16 hex
    /// characters of SHA-256 over `<url>_<raw timestamp>`, so re-delivery of
    /// the same capture upserts rather than duplicating.
    pub fn from_capture(session_id: Option<&str>, capture: &CapturedRequest) -> Self {
        let id = short_hash(
            &format!("{}_{}", capture.url, capture.raw_timestamp()),
            16,
        );
        Self {
            id,
            session_id: session_id.map(str::to_string),
            url: capture.url.clone(),
            method: capture.method.clone(),
            request_headers: capture.request_headers.clone(),
            request_body: capture.request_body_string(),
            response_headers: capture.response_headers.clone(),
            response_body: capture.response_body_string(),
            status_code: capture.status_code,
            timestamp: capture.timestamp_or_now(),
        }
    }
}

/// A normalized SMS message extracted from a captured API response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    /// Timestamp as found in the message payload, kept verbatim.
    pub timestamp: String,
    pub status: String,
    /// URL of the request the message was extracted from.
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsStats {
    pub total: usize,
    pub today: usize,
    pub by_source: HashMap<String, usize>,
    pub by_status: HashMap<String, usize>,
}

/// On-disk SMS store shared with the SMS panel (`tools/sms_data.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsStore {
    #[serde(default)]
    pub messages: Vec<SmsMessage>,
    #[serde(default)]
    pub stats: SmsStats,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Parse a format string, defaulting to JSON for anything unrecognized.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("csv") {
            ExportFormat::Csv
        } else {
            ExportFormat::Json
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}
