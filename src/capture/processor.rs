//! Per-request processing pipeline for captured browser traffic.
//!
//! Each captured request is dumped to disk, attached to its domain session,
//! mined for tokens, checked for login shape, and scanned for SMS payloads.
//! Every step is best-effort: a failing step logs a warning and the batch
//! moves on to the next request.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;

use crate::capture::sms;
use crate::capture::types::{CapturedRequest, SmsMessage};
use crate::session_management::types::SessionUpdate;
use crate::session_management::SessionManager;
use crate::storage::data_dir::DataDir;

/// A request URL mentioning one of these is treated as a login attempt.
const LOGIN_URL_KEYWORDS: [&str; 5] = ["login", "signin", "auth", "authenticate", "password"];

/// A request body mentioning one of these is treated as carrying credentials.
const CREDENTIAL_BODY_KEYWORDS: [&str; 5] = ["password", "passwd", "pwd", "username", "email"];

/// What a processed batch produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Requests that made it through the pipeline.
    pub processed: usize,
    /// SMS messages mined from the batch (already appended to the store).
    pub sms: Vec<SmsMessage>,
}

pub struct CaptureProcessor {
    sessions: Arc<SessionManager>,
    data: DataDir,
    auto_session: bool,
}

impl CaptureProcessor {
    pub fn new(sessions: Arc<SessionManager>, data: DataDir, auto_session: bool) -> Self {
        Self {
            sessions,
            data,
            auto_session,
        }
    }

    /// Run the pipeline over a batch of captured requests.
    pub async fn process_batch(&self, requests: &[CapturedRequest]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for request in requests {
            if request.url.is_empty() {
                debug!("Skipping capture with empty url");
                continue;
            }
            self.process_one(request, &mut outcome).await;
            outcome.processed += 1;
        }
        if !outcome.sms.is_empty() {
            if let Err(e) = sms::append_to_store(&self.data, &outcome.sms) {
                warn!("SMS store update failed: {}", e);
            }
        }
        if outcome.processed > 0 {
            info!(
                "Processed {} captured request(s), {} SMS message(s)",
                outcome.processed,
                outcome.sms.len()
            );
        }
        outcome
    }

    async fn process_one(&self, request: &CapturedRequest, outcome: &mut BatchOutcome) {
        if let Err(e) = self.data.dump_request(request) {
            warn!("Request dump failed for {}: {}", request.url, e);
        }

        if let Some(domain) = request.domain() {
            match self.sessions.get_session_for_domain(&domain, true).await {
                Ok(Some(session)) => {
                    if let Err(e) = self
                        .sessions
                        .record_request(Some(&session.id), request)
                        .await
                    {
                        warn!("Request record failed for {}: {}", request.url, e);
                    }
                    if self.auto_session {
                        if let Err(e) = self
                            .sessions
                            .extract_tokens_from_request(&session.id, request)
                            .await
                        {
                            warn!("Token extraction failed for {}: {}", request.url, e);
                        }
                    }
                    if is_login_request(request) {
                        self.save_login_template(&session.id, &domain, request).await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Session lookup failed for {}: {}", domain, e),
            }
        }

        outcome.sms.extend(sms::extract_sms(request));
    }

    /// Persist the login template for a domain and fold it into the
    /// session's `login_data` so replays have everything in one place.
    async fn save_login_template(&self, session_id: &str, domain: &str, request: &CapturedRequest) {
        let template = json!({
            "login_url": &request.url,
            "login_method": &request.method,
            "login_headers": &request.request_headers,
            "login_body": request.request_body_string(),
            "last_login": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.data.save_login_template(domain, &template) {
            warn!("Login template save failed for {}: {}", domain, e);
            return;
        }
        info!("Login template saved for {}", domain);

        let login_data = match template {
            serde_json::Value::Object(map) => map,
            _ => return,
        };
        let update = SessionUpdate {
            login_data: Some(login_data),
            ..Default::default()
        };
        if let Err(e) = self.sessions.update_session(session_id, update).await {
            warn!("Login data update failed for {}: {}", domain, e);
        }
    }
}

/// Login shape heuristic: the URL names a login-ish path, or the body
/// carries credential-looking fields.
pub fn is_login_request(request: &CapturedRequest) -> bool {
    let url = request.url.to_lowercase();
    if LOGIN_URL_KEYWORDS.iter().any(|kw| url.contains(kw)) {
        return true;
    }
    let body = request.request_body_string().to_lowercase();
    CREDENTIAL_BODY_KEYWORDS.iter().any(|kw| body.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::MemoryStore;
    use tempfile::TempDir;

    fn processor(dir: &TempDir, auto_session: bool) -> (CaptureProcessor, Arc<SessionManager>) {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(store, dir.path().join("captchas")));
        let data = DataDir::new(dir.path(), dir.path().join("data"));
        (
            CaptureProcessor::new(sessions.clone(), data, auto_session),
            sessions,
        )
    }

    fn capture(value: serde_json::Value) -> CapturedRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_login_detection() {
        let by_url = capture(serde_json::json!({"url": "https://example.com/signin"}));
        assert!(is_login_request(&by_url));

        let by_body = capture(serde_json::json!({
            "url": "https://example.com/submit",
            "requestBody": "{\"username\": \"a\", \"passwd\": \"b\"}"
        }));
        assert!(is_login_request(&by_body));

        let plain = capture(serde_json::json!({
            "url": "https://example.com/items",
            "requestBody": "{\"page\": 2}"
        }));
        assert!(!is_login_request(&plain));
    }

    #[tokio::test]
    async fn test_batch_creates_sessions_and_extracts_tokens() {
        let dir = TempDir::new().unwrap();
        let (processor, sessions) = processor(&dir, true);

        let batch = vec![capture(serde_json::json!({
            "url": "https://api.example.com/login",
            "method": "POST",
            "requestBody": "{\"username\": \"a\", \"password\": \"b\"}",
            "responseHeaders": {"set-cookie": "sessionid=abc123; Path=/"},
            "responseBody": "{\"access_token\": \"tok-0123456789abcdef\"}"
        }))];

        let outcome = processor.process_batch(&batch).await;
        assert_eq!(outcome.processed, 1);

        let session = sessions
            .get_session_for_domain("api.example.com", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            session.cookies.get("sessionid").map(String::as_str),
            Some("abc123")
        );
        assert!(session.tokens.contains_key("access_token"));
        // Login template folded into login_data and written to disk
        assert_eq!(
            session.login_data.get("login_url").and_then(|v| v.as_str()),
            Some("https://api.example.com/login")
        );
        let template_path = dir
            .path()
            .join("data")
            .join("login_api_example_com.json");
        assert!(template_path.exists());

        let recorded = sessions
            .requests_for_session(&session.id, 10)
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_session_off_skips_token_extraction() {
        let dir = TempDir::new().unwrap();
        let (processor, sessions) = processor(&dir, false);

        let batch = vec![capture(serde_json::json!({
            "url": "https://api.example.com/items",
            "responseHeaders": {"set-cookie": "sessionid=abc123"}
        }))];
        processor.process_batch(&batch).await;

        let session = sessions
            .get_session_for_domain("api.example.com", false)
            .await
            .unwrap()
            .unwrap();
        assert!(session.cookies.is_empty());
    }

    #[tokio::test]
    async fn test_sms_batch_lands_in_store() {
        let dir = TempDir::new().unwrap();
        let (processor, _sessions) = processor(&dir, true);

        let batch = vec![capture(serde_json::json!({
            "url": "https://api.twilio.com/Messages.json",
            "responseBody": "{\"messages\": [{\"id\": \"m1\", \"body\": \"hi\"}]}"
        }))];
        let outcome = processor.process_batch(&batch).await;
        assert_eq!(outcome.sms.len(), 1);

        let data = DataDir::new(dir.path(), dir.path().join("data"));
        let store = sms::load_store(&data);
        assert_eq!(store.messages.len(), 1);
        assert_eq!(store.messages[0].id, "m1");
    }

    #[tokio::test]
    async fn test_empty_urls_are_skipped() {
        let dir = TempDir::new().unwrap();
        let (processor, _sessions) = processor(&dir, true);
        let batch = vec![capture(serde_json::json!({"url": ""}))];
        let outcome = processor.process_batch(&batch).await;
        assert_eq!(outcome.processed, 0);
    }
}
