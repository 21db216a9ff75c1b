//! Core types for the session subsystem.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lifetime of a newly created session, in days.
pub const SESSION_TTL_DAYS: i64 = 7;

/// First `len` hex characters of the SHA-256 digest of `input`.
///
/// Session and request identifiers are 16 characters; CAPTCHA fingerprints
/// use 32 or the full digest.
pub fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(len);
    out
}

/// Credentials supplied when a session is created explicitly.
///
/// The whole object (including any extra keys the caller sends) is kept as
/// the session's initial `login_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionCredentials {
    fn as_login_data(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// One authenticated (or in-progress) relationship with a web domain.
///
/// Sessions are cached in memory and persisted to SQLite; the maps are stored
/// as JSON text columns. `last_used` is bumped whenever the session is looked
/// up by domain or updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSession {
    pub id: String,
    pub domain: String,
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub login_data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DomainSession {
    /// Create a fresh session for `domain`.
    ///
    /// The id is the first 16 hex characters of the SHA-256 digest over
    /// `<domain>_<creation time>`; expiry is seven days out.
    pub fn new(domain: &str, credentials: Option<&SessionCredentials>) -> Self {
        let now = Utc::now();
        let id = short_hash(&format!("{}_{}", domain, now.to_rfc3339()), 16);
        let mut metadata = Map::new();
        metadata.insert("auto_created".to_string(), Value::Bool(true));
        Self {
            id,
            domain: domain.to_string(),
            username: credentials.and_then(|c| c.username.clone()),
            email: credentials.and_then(|c| c.email.clone()),
            cookies: HashMap::new(),
            tokens: HashMap::new(),
            headers: HashMap::new(),
            login_data: credentials.map(|c| c.as_login_data()).unwrap_or_default(),
            created_at: now,
            last_used: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
            is_active: true,
            metadata,
        }
    }

    /// Apply a partial update. Fields present in the update replace the
    /// session's values wholesale; `last_used` is always bumped.
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(username) = update.username {
            self.username = Some(username);
        }
        if let Some(email) = update.email {
            self.email = Some(email);
        }
        if let Some(cookies) = update.cookies {
            self.cookies = cookies;
        }
        if let Some(tokens) = update.tokens {
            self.tokens = tokens;
        }
        if let Some(headers) = update.headers {
            self.headers = headers;
        }
        if let Some(login_data) = update.login_data {
            self.login_data = login_data;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        if let Some(expires_at) = update.expires_at {
            self.expires_at = expires_at;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.last_used = Utc::now();
    }
}

/// Partial session update; unknown keys in the incoming JSON are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub cookies: Option<HashMap<String, String>>,
    #[serde(default)]
    pub tokens: Option<HashMap<String, String>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub login_data: Option<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// CAPTCHA categories the solver distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaKind {
    Math,
    Image,
    #[serde(other)]
    Unknown,
}

impl Default for CaptchaKind {
    fn default() -> Self {
        CaptchaKind::Unknown
    }
}

impl CaptchaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptchaKind::Math => "math",
            CaptchaKind::Image => "image",
            CaptchaKind::Unknown => "unknown",
        }
    }
}

/// A CAPTCHA challenge forwarded by the browser extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    #[serde(rename = "type", default)]
    pub kind: CaptchaKind,
    #[serde(default)]
    pub question: Option<String>,
    /// Base64-encoded image payload for image challenges.
    #[serde(default)]
    pub image: Option<String>,
}

/// Persisted record of a solved CAPTCHA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaRecord {
    pub id: String,
    pub captcha_type: String,
    pub question: Option<String>,
    pub image_path: Option<String>,
    pub solution: String,
    pub solved_at: DateTime<Utc>,
    pub used_count: i64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_stable_and_truncated() {
        let a = short_hash("example.com_2024", 16);
        let b = short_hash("example.com_2024", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_session_shape() {
        let creds = SessionCredentials {
            username: Some("alice".into()),
            email: None,
            extra: Map::new(),
        };
        let session = DomainSession::new("example.com", Some(&creds));
        assert_eq!(session.id.len(), 16);
        assert_eq!(session.domain, "example.com");
        assert_eq!(session.username.as_deref(), Some("alice"));
        assert!(session.is_active);
        assert!(session.cookies.is_empty());
        assert_eq!(
            session.metadata.get("auto_created"),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            session.login_data.get("username"),
            Some(&Value::String("alice".into()))
        );
        let ttl = session.expires_at - session.created_at;
        assert_eq!(ttl.num_days(), SESSION_TTL_DAYS);
    }

    #[test]
    fn test_apply_replaces_named_fields_and_bumps_last_used() {
        let mut session = DomainSession::new("example.com", None);
        session
            .cookies
            .insert("old".to_string(), "value".to_string());
        let before = session.last_used;

        let mut cookies = HashMap::new();
        cookies.insert("sid".to_string(), "abc123".to_string());
        session.apply(SessionUpdate {
            cookies: Some(cookies),
            is_active: Some(false),
            ..Default::default()
        });

        assert!(!session.cookies.contains_key("old"));
        assert_eq!(session.cookies.get("sid").map(String::as_str), Some("abc123"));
        assert!(!session.is_active);
        assert!(session.last_used >= before);
    }

    #[test]
    fn test_session_update_ignores_unknown_keys() {
        let update: SessionUpdate =
            serde_json::from_str(r#"{"session_id": "abc", "username": "bob"}"#).unwrap();
        assert_eq!(update.username.as_deref(), Some("bob"));
        assert!(update.cookies.is_none());
    }

    #[test]
    fn test_captcha_kind_parsing() {
        let challenge: CaptchaChallenge =
            serde_json::from_str(r#"{"type": "math", "question": "2 plus 2"}"#).unwrap();
        assert_eq!(challenge.kind, CaptchaKind::Math);
        let odd: CaptchaChallenge = serde_json::from_str(r#"{"type": "audio"}"#).unwrap();
        assert_eq!(odd.kind, CaptchaKind::Unknown);
    }
}
