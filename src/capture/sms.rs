//! SMS extraction from captured API traffic and the shared SMS store.
//!
//! The SMS panel tool reads `tools/sms_data.json`; this module appends
//! messages mined out of responses from SMS-looking endpoints and keeps the
//! store's stats in sync.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;

use crate::capture::types::{CapturedRequest, SmsMessage, SmsStats, SmsStore};
use crate::error_handling::types::CaptureError;
use crate::storage::data_dir::DataDir;

/// A request URL mentioning one of these is treated as SMS API traffic.
const SMS_URL_KEYWORDS: [&str; 7] = [
    "sms", "message", "text", "mms", "twilio", "nexmo", "plivo",
];

pub fn looks_like_sms_request(url: &str) -> bool {
    let lower = url.to_lowercase();
    SMS_URL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Pull normalized SMS messages out of a captured response.
///
/// Messages live under a `messages` or `sms` key of a JSON object, or the
/// body is itself an array. Field names vary by provider, so each field
/// falls back through the common aliases; missing fields become empty
/// strings rather than dropping the message.
pub fn extract_sms(request: &CapturedRequest) -> Vec<SmsMessage> {
    if !looks_like_sms_request(&request.url) {
        return Vec::new();
    }
    let body = request.response_body_string();
    if body.is_empty() {
        return Vec::new();
    }
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!("SMS body not JSON for {}: {}", request.url, e);
            return Vec::new();
        }
    };

    let messages = match &parsed {
        Value::Object(map) => match map.get("messages").or_else(|| map.get("sms")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        Value::Array(items) => items.as_slice(),
        _ => &[],
    };

    messages
        .iter()
        .filter_map(|msg| msg.as_object())
        .map(|msg| SmsMessage {
            id: first_string(msg, &["id", "message_id"]),
            from: first_string(msg, &["from", "sender"]),
            to: first_string(msg, &["to", "recipient"]),
            body: first_string(msg, &["body", "text", "message"]),
            timestamp: {
                let ts = first_string(msg, &["timestamp", "date"]);
                if ts.is_empty() {
                    Utc::now().to_rfc3339()
                } else {
                    ts
                }
            },
            status: {
                let status = first_string(msg, &["status"]);
                if status.is_empty() {
                    "unknown".to_string()
                } else {
                    status
                }
            },
            source: request.url.clone(),
        })
        .collect()
}

fn first_string(msg: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    for key in keys {
        match msg.get(*key) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Null) | None => continue,
            Some(other) => return other.to_string(),
        }
    }
    String::new()
}

/// Append messages to the SMS store and recompute its stats.
///
/// A missing or corrupt store file starts fresh rather than failing; the
/// panel tolerates that and so do we.
pub fn append_to_store(data: &DataDir, messages: &[SmsMessage]) -> Result<(), CaptureError> {
    if messages.is_empty() {
        return Ok(());
    }
    let path = data.sms_store_path();
    let mut store: SmsStore = data.read_json(&path).unwrap_or_default();
    store.messages.extend_from_slice(messages);
    store.stats = compute_stats(&store.messages);
    store.last_updated = Some(Utc::now());
    data.write_json(&path, &store)?;
    debug!("Appended {} SMS message(s) to {}", messages.len(), path.display());
    Ok(())
}

fn compute_stats(messages: &[SmsMessage]) -> SmsStats {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut by_source: HashMap<String, usize> = HashMap::new();
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut today_count = 0;
    for msg in messages {
        *by_source.entry(msg.source.clone()).or_default() += 1;
        *by_status.entry(msg.status.clone()).or_default() += 1;
        if msg.timestamp.starts_with(&today) {
            today_count += 1;
        }
    }
    SmsStats {
        total: messages.len(),
        today: today_count,
        by_source,
        by_status,
    }
}

/// Load the full SMS store, empty when absent.
pub fn load_store(data: &DataDir) -> SmsStore {
    data.read_json(&data.sms_store_path()).unwrap_or_else(|| {
        warn!("SMS store missing or unreadable, starting empty");
        SmsStore::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sms_capture(url: &str, body: &str) -> CapturedRequest {
        serde_json::from_value(serde_json::json!({
            "url": url,
            "responseBody": body,
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_from_messages_key() {
        let body = r#"{"messages": [
            {"id": "m1", "from": "+15550001", "to": "+15550002", "body": "hi", "status": "received"},
            {"message_id": "m2", "sender": "+15550003", "recipient": "+15550004", "text": "yo"}
        ]}"#;
        let messages = extract_sms(&sms_capture("https://api.twilio.com/2010/Messages.json", body));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].from, "+15550001");
        assert_eq!(messages[1].id, "m2");
        assert_eq!(messages[1].from, "+15550003");
        assert_eq!(messages[1].body, "yo");
        assert_eq!(messages[1].status, "unknown");
        assert!(!messages[1].timestamp.is_empty());
    }

    #[test]
    fn test_extract_from_top_level_array() {
        let body = r#"[{"id": "a", "body": "one"}, {"id": "b", "message": "two"}]"#;
        let messages = extract_sms(&sms_capture("https://example.com/sms/inbox", body));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].body, "two");
    }

    #[test]
    fn test_non_sms_url_ignored() {
        let body = r#"{"messages": [{"id": "m1"}]}"#;
        assert!(extract_sms(&sms_capture("https://example.com/api/items", body)).is_empty());
    }

    #[test]
    fn test_non_json_body_ignored() {
        assert!(extract_sms(&sms_capture("https://example.com/sms", "<html>")).is_empty());
    }

    #[test]
    fn test_store_append_and_stats() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path(), dir.path().join("data"));

        let now = Utc::now().to_rfc3339();
        let batch = vec![
            SmsMessage {
                id: "1".into(),
                from: "a".into(),
                to: "b".into(),
                body: "x".into(),
                timestamp: now.clone(),
                status: "received".into(),
                source: "https://api.twilio.com".into(),
            },
            SmsMessage {
                id: "2".into(),
                from: "c".into(),
                to: "d".into(),
                body: "y".into(),
                timestamp: "2020-01-01T00:00:00Z".into(),
                status: "sent".into(),
                source: "https://api.twilio.com".into(),
            },
        ];
        append_to_store(&data, &batch).unwrap();
        append_to_store(&data, &batch[..1].to_vec()).unwrap();

        let store = load_store(&data);
        assert_eq!(store.messages.len(), 3);
        assert_eq!(store.stats.total, 3);
        assert_eq!(store.stats.today, 2);
        assert_eq!(store.stats.by_status.get("received"), Some(&2));
        assert_eq!(store.stats.by_source.get("https://api.twilio.com"), Some(&3));
        assert!(store.last_updated.is_some());
    }
}
