//! Message and client types for the relay bridge.

use chrono::Utc;
use serde_json::{json, Value};

/// What kind of client is on the other end of a relay connection.
///
/// Clients announce themselves with a hello line (`{"type": "browser"}`)
/// right after connecting; anything else stays `Unknown` and only receives
/// broadcasts targeted at `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Browser,
    ApiTester,
    SmsPanel,
    Unknown,
}

impl ClientKind {
    pub fn from_str(value: &str) -> Self {
        match value {
            "browser" => ClientKind::Browser,
            "api_tester" => ClientKind::ApiTester,
            "sms_panel" => ClientKind::SmsPanel,
            _ => ClientKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Browser => "browser",
            ClientKind::ApiTester => "api_tester",
            ClientKind::SmsPanel => "sms_panel",
            ClientKind::Unknown => "unknown",
        }
    }

    /// Whether a broadcast aimed at `target` should reach this client.
    /// `tools` addresses the desktop tools without the browser.
    pub fn matches_target(&self, target: &str) -> bool {
        match target {
            "all" => true,
            "tools" => matches!(self, ClientKind::ApiTester | ClientKind::SmsPanel),
            _ => target == self.as_str(),
        }
    }
}

/// An outbound relay broadcast. Wire form is one JSON object per line.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    pub target: String,
    pub body: Value,
}

impl RelayMessage {
    fn new(kind: &str, target: &str, mut extra: Value) -> Self {
        let body = match extra.as_object_mut() {
            Some(map) => {
                map.insert("type".into(), json!(kind));
                map.insert("target".into(), json!(target));
                map.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
                Value::Object(std::mem::take(map))
            }
            None => json!({
                "type": kind,
                "target": target,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        };
        Self {
            target: target.to_string(),
            body,
        }
    }

    /// Captured requests forwarded to the API tester.
    pub fn api_requests(requests: &Value) -> Self {
        Self::new("api_requests", "api_tester", json!({ "data": requests }))
    }

    /// SMS messages forwarded to the SMS panel.
    pub fn sms_data(messages: &Value) -> Self {
        Self::new("sms_data", "sms_panel", json!({ "data": messages }))
    }

    /// A CAPTCHA solution (or null) sent back to the browser.
    pub fn captcha_solution(solution: Option<&str>) -> Self {
        Self::new("captcha_solution", "browser", json!({ "solution": solution }))
    }

    /// Notification to the desktop tools that a capture batch has been
    /// processed. The browser sent the batch, so it is not echoed back.
    pub fn new_captures(count: usize) -> Self {
        Self::new("new_captures", "tools", json!({ "count": count }))
    }

    pub fn browser_connected() -> Self {
        Self::new("browser_connected", "all", json!({}))
    }

    pub fn browser_disconnected() -> Self {
        Self::new("browser_disconnected", "all", json!({}))
    }

    /// Wire rendering: compact JSON plus the line terminator.
    pub fn to_line(&self) -> String {
        let mut line = self.body.to_string();
        line.push('\n');
        line
    }
}
