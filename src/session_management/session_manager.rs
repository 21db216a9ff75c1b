//! Central manager for per-domain sessions, captured requests and CAPTCHA
//! solving.
//!
//! The manager keeps a write-through cache of sessions in front of the
//! [`Store`]; every mutation lands in both, so a restart loses only the
//! in-memory CAPTCHA cache. Updates are last-write-wins on the fields they
//! name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use log::{info, warn};
use serde_json::json;

use crate::capture::types::{domain_of, CapturedRequest, ExportFormat, StoredRequest};
use crate::error_handling::types::SessionError;
use crate::session_management::captcha::CaptchaSolver;
use crate::session_management::token_extraction;
use crate::session_management::types::{
    CaptchaChallenge, DomainSession, SessionCredentials, SessionUpdate,
};
use crate::storage::storage_trait::Store;

/// How often the expiry sweep runs.
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Sessions expiring within this window get flagged by the sweep.
const EXPIRY_WARNING_HOURS: i64 = 1;

/// Cap on the number of requests included in a full export.
const EXPORT_REQUEST_LIMIT: u32 = 1000;

pub struct SessionManager {
    store: Arc<dyn Store>,
    cache: Mutex<HashMap<String, DomainSession>>,
    captcha: CaptchaSolver,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, captcha_dir: PathBuf) -> Self {
        Self {
            store: store.clone(),
            cache: Mutex::new(HashMap::new()),
            captcha: CaptchaSolver::new(store, captcha_dir),
        }
    }

    /// Create and persist a fresh session for `domain`.
    pub async fn create_session(
        &self,
        domain: &str,
        credentials: Option<&SessionCredentials>,
    ) -> Result<DomainSession, SessionError> {
        let session = DomainSession::new(domain, credentials);
        self.store.save_session(&session).await?;
        self.cache_put(&session);
        info!("Created new session for {}: {}", domain, session.id);
        Ok(session)
    }

    /// Look up a session by id, cache first.
    pub async fn get_session(&self, id: &str) -> Result<Option<DomainSession>, SessionError> {
        if let Some(session) = self.cache_get(id) {
            return Ok(Some(session));
        }
        let session = self.store.get_session(id).await?;
        if let Some(session) = &session {
            self.cache_put(session);
        }
        Ok(session)
    }

    /// The most recently used active session for a domain, bumping its
    /// `last_used`; optionally creates one when the domain has none.
    pub async fn get_session_for_domain(
        &self,
        domain: &str,
        create_if_missing: bool,
    ) -> Result<Option<DomainSession>, SessionError> {
        if let Some(mut session) = self.store.latest_session_for_domain(domain).await? {
            let now = Utc::now();
            session.last_used = now;
            self.store.touch_session(&session.id, now).await?;
            self.cache_put(&session);
            return Ok(Some(session));
        }
        if create_if_missing {
            return Ok(Some(self.create_session(domain, None).await?));
        }
        Ok(None)
    }

    /// Apply a partial update to a session, last-write-wins.
    ///
    /// Returns `false` for an unknown id; update failures on a known id do
    /// escalate, since they mean the store rejected a write.
    pub async fn update_session(
        &self,
        id: &str,
        update: SessionUpdate,
    ) -> Result<bool, SessionError> {
        let mut session = match self.get_session(id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        session.apply(update);
        self.store.save_session(&session).await?;
        self.cache_put(&session);
        Ok(true)
    }

    /// Persist a captured request against a session. Re-delivery of the same
    /// capture upserts on the content-derived id.
    pub async fn record_request(
        &self,
        session_id: Option<&str>,
        capture: &CapturedRequest,
    ) -> Result<String, SessionError> {
        let row = StoredRequest::from_capture(session_id, capture);
        self.store.save_request(&row).await?;
        Ok(row.id)
    }

    pub async fn requests_for_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, SessionError> {
        Ok(self.store.requests_for_session(session_id, limit).await?)
    }

    /// Run the token/cookie heuristics over a captured response and merge
    /// anything found into the session. Returns whether the session gained
    /// new material.
    pub async fn extract_tokens_from_request(
        &self,
        session_id: &str,
        capture: &CapturedRequest,
    ) -> Result<bool, SessionError> {
        let session = match self.get_session(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };

        let new_cookies = token_extraction::extract_cookies(&capture.response_headers);
        let new_tokens = token_extraction::extract_tokens(&capture.response_body_string());
        if new_cookies.is_empty() && new_tokens.is_empty() {
            return Ok(false);
        }

        let mut cookies = session.cookies.clone();
        cookies.extend(new_cookies);
        let mut tokens = session.tokens.clone();
        tokens.extend(new_tokens);

        self.update_session(
            session_id,
            SessionUpdate {
                cookies: Some(cookies),
                tokens: Some(tokens),
                ..Default::default()
            },
        )
        .await?;
        Ok(true)
    }

    /// Outgoing auth material for a URL's host: a `Cookie` header joining the
    /// stored cookies, a bearer `Authorization` from the first token whose
    /// name mentions `bearer` or `access`, and the session's custom headers
    /// merged over the top. Unknown domains yield an empty map.
    pub async fn auth_for_url(&self, url: &str) -> HashMap<String, String> {
        let domain = match domain_of(url) {
            Some(domain) => domain,
            None => return HashMap::new(),
        };
        let session = match self.get_session_for_domain(&domain, false).await {
            Ok(Some(session)) => session,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                warn!("Auth lookup failed for {}: {}", domain, e);
                return HashMap::new();
            }
        };

        let mut auth = HashMap::new();
        if !session.cookies.is_empty() {
            let cookie_header = session
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            auth.insert("Cookie".to_string(), cookie_header);
        }
        for (name, value) in &session.tokens {
            let lower = name.to_lowercase();
            if lower.contains("bearer") || lower.contains("access") {
                auth.insert("Authorization".to_string(), format!("Bearer {}", value));
                break;
            }
        }
        for (name, value) in &session.headers {
            auth.insert(name.clone(), value.clone());
        }
        auth
    }

    /// Recent captured login requests for a domain, usable as replay
    /// templates.
    pub async fn login_patterns_for_domain(
        &self,
        domain: &str,
    ) -> Result<Vec<StoredRequest>, SessionError> {
        Ok(self.store.login_requests_for_domain(domain, 5).await?)
    }

    /// Attempt an automatic login for a domain.
    ///
    /// Login execution is not implemented; this ensures a session exists,
    /// reports whether a replayable pattern was found, and returns `false`.
    pub async fn auto_login(
        &self,
        domain: &str,
        credentials: Option<&SessionCredentials>,
    ) -> Result<bool, SessionError> {
        if self.get_session_for_domain(domain, false).await?.is_none() {
            self.create_session(domain, credentials).await?;
        }
        let patterns = self.login_patterns_for_domain(domain).await?;
        if patterns.is_empty() {
            warn!("No login pattern found for {}", domain);
        } else {
            info!(
                "Login pattern available for {} but auto-login execution is not implemented",
                domain
            );
        }
        Ok(false)
    }

    pub async fn solve_captcha(&self, challenge: &CaptchaChallenge) -> Option<String> {
        self.captcha.solve(challenge).await
    }

    pub async fn session_count(&self) -> usize {
        self.store.all_sessions().await.map(|s| s.len()).unwrap_or(0)
    }

    /// Snapshot of sessions keyed by domain, most recently used per domain.
    pub async fn sessions_by_domain(&self) -> HashMap<String, DomainSession> {
        let sessions = match self.store.all_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Session snapshot failed: {}", e);
                return HashMap::new();
            }
        };
        let mut by_domain: HashMap<String, DomainSession> = HashMap::new();
        for session in sessions {
            match by_domain.get(&session.domain) {
                Some(existing) if existing.last_used >= session.last_used => {}
                _ => {
                    by_domain.insert(session.domain.clone(), session);
                }
            }
        }
        by_domain
    }

    /// Full dump of sessions, recent requests and CAPTCHA solutions to the
    /// export directory. JSON yields one file; CSV yields a sessions file and
    /// a requests file, returning the former.
    pub async fn export_sessions(
        &self,
        format: ExportFormat,
        export_dir: &Path,
    ) -> Result<PathBuf, SessionError> {
        let sessions = self.store.all_sessions().await?;
        let requests = self.store.recent_requests(EXPORT_REQUEST_LIMIT).await?;
        let captchas = self.store.all_captcha_solutions().await?;

        std::fs::create_dir_all(export_dir).map_err(|e| {
            warn!("Export dir error: {}", e);
            SessionError::CreationFailed
        })?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");

        match format {
            ExportFormat::Json => {
                let path = export_dir.join(format!("sessions_export_{}.json", stamp));
                let dump = json!({
                    "sessions": sessions,
                    "requests": requests,
                    "captchas": captchas,
                    "exported_at": Utc::now(),
                });
                let text = serde_json::to_string_pretty(&dump)
                    .map_err(|_| SessionError::CreationFailed)?;
                std::fs::write(&path, text).map_err(|_| SessionError::CreationFailed)?;
                info!("Sessions exported to {}", path.display());
                Ok(path)
            }
            ExportFormat::Csv => {
                let sessions_path =
                    export_dir.join(format!("sessions_export_{}_sessions.csv", stamp));
                let mut out = crate::capture::exporter::csv_row(&[
                    "ID", "Domain", "Username", "Created", "Last Used",
                ]);
                for s in &sessions {
                    out.push_str(&crate::capture::exporter::csv_row(&[
                        &s.id,
                        &s.domain,
                        s.username.as_deref().unwrap_or(""),
                        &s.created_at.to_rfc3339(),
                        &s.last_used.to_rfc3339(),
                    ]));
                }
                std::fs::write(&sessions_path, out).map_err(|_| SessionError::CreationFailed)?;

                let requests_path =
                    export_dir.join(format!("sessions_export_{}_requests.csv", stamp));
                let mut out =
                    crate::capture::exporter::csv_row(&["URL", "Method", "Status", "Time"]);
                for r in &requests {
                    let status = r.status_code.map(|c| c.to_string()).unwrap_or_default();
                    out.push_str(&crate::capture::exporter::csv_row(&[
                        &r.url,
                        r.method.as_deref().unwrap_or(""),
                        &status,
                        &r.timestamp.to_rfc3339(),
                    ]));
                }
                std::fs::write(&requests_path, out).map_err(|_| SessionError::CreationFailed)?;

                info!("Sessions exported to {}", sessions_path.display());
                Ok(sessions_path)
            }
        }
    }

    /// Background sweep that flags sessions nearing expiry.
    ///
    /// The sweep only logs; it does not refresh, delete, or deactivate
    /// anything.
    pub fn spawn_expiry_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await;
            loop {
                interval.tick().await;
                let cutoff = Utc::now() + Duration::hours(EXPIRY_WARNING_HOURS);
                match manager.store.sessions_expiring_before(cutoff).await {
                    Ok(expiring) => {
                        for session in expiring {
                            info!(
                                "Session {} ({}) expiring soon at {}",
                                session.id, session.domain, session.expires_at
                            );
                        }
                    }
                    Err(e) => warn!("Session expiry sweep error: {}", e),
                }
            }
        })
    }

    fn cache_get(&self, id: &str) -> Option<DomainSession> {
        self.cache.lock().ok()?.get(id).cloned()
    }

    fn cache_put(&self, session: &DomainSession) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(session.id.clone(), session.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::MemoryStore;
    use serde_json::Map;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()), dir.path().join("captchas"))
    }

    fn capture_with_tokens() -> CapturedRequest {
        serde_json::from_str(
            r#"{
                "url": "https://api.example.com/login",
                "method": "POST",
                "responseHeaders": {"set-cookie": "sessionid=abc123; Path=/; theme=dark"},
                "responseBody": "{\"access_token\": \"tok-0123456789abcdef\"}"
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_session_for_domain_creates_and_reuses() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let created = mgr
            .get_session_for_domain("example.com", true)
            .await
            .unwrap()
            .unwrap();
        let reused = mgr
            .get_session_for_domain("example.com", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.id, reused.id);
        assert!(reused.last_used >= created.last_used);

        assert!(mgr
            .get_session_for_domain("other.org", false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_session_returns_false() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let updated = mgr
            .update_session("no-such-id", SessionUpdate::default())
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_token_extraction_merges_into_session() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let session = mgr.create_session("api.example.com", None).await.unwrap();

        let found = mgr
            .extract_tokens_from_request(&session.id, &capture_with_tokens())
            .await
            .unwrap();
        assert!(found);

        let updated = mgr.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(
            updated.cookies.get("sessionid").map(String::as_str),
            Some("abc123")
        );
        assert!(updated.tokens.contains_key("access_token"));
        assert!(!updated.cookies.contains_key("theme"));

        // A capture with nothing interesting reports no new material
        let empty: CapturedRequest =
            serde_json::from_str(r#"{"url": "https://api.example.com/ping"}"#).unwrap();
        assert!(!mgr
            .extract_tokens_from_request(&session.id, &empty)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_auth_for_url_assembly() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let session = mgr.create_session("api.example.com", None).await.unwrap();
        let mut tokens = HashMap::new();
        tokens.insert(
            "access_token".to_string(),
            "tok-0123456789abcdef".to_string(),
        );
        let mut cookies = HashMap::new();
        cookies.insert("sessionid".to_string(), "abc123".to_string());
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), "key-1".to_string());
        mgr.update_session(
            &session.id,
            SessionUpdate {
                tokens: Some(tokens),
                cookies: Some(cookies),
                headers: Some(headers),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let auth = mgr.auth_for_url("https://api.example.com/v1/items").await;
        assert_eq!(
            auth.get("Cookie").map(String::as_str),
            Some("sessionid=abc123")
        );
        assert_eq!(
            auth.get("Authorization").map(String::as_str),
            Some("Bearer tok-0123456789abcdef")
        );
        assert_eq!(auth.get("X-Api-Key").map(String::as_str), Some("key-1"));

        assert!(mgr.auth_for_url("https://unknown.net/x").await.is_empty());
        assert!(mgr.auth_for_url("garbage").await.is_empty());
    }

    #[tokio::test]
    async fn test_record_request_and_query() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let session = mgr.create_session("example.com", None).await.unwrap();

        let capture: CapturedRequest = serde_json::from_str(
            r#"{"url": "https://example.com/a", "timestamp": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let id = mgr
            .record_request(Some(&session.id), &capture)
            .await
            .unwrap();
        assert_eq!(id.len(), 16);

        let requests = mgr.requests_for_session(&session.id, 10).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://example.com/a");
    }

    #[tokio::test]
    async fn test_auto_login_is_a_reported_noop() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let creds = SessionCredentials {
            username: Some("alice".into()),
            email: None,
            extra: Map::new(),
        };
        let result = mgr.auto_login("example.com", Some(&creds)).await.unwrap();
        assert!(!result);
        // But the session now exists with the credentials attached
        let session = mgr
            .get_session_for_domain("example.com", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_export_sessions_json() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.create_session("example.com", None).await.unwrap();

        let path = mgr
            .export_sessions(ExportFormat::Json, &dir.path().join("exports"))
            .await
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let dump: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(dump["sessions"].as_array().unwrap().len(), 1);
        assert!(dump["exported_at"].is_string());
    }

    #[tokio::test]
    async fn test_export_sessions_csv_writes_two_files() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let session = mgr.create_session("example.com", None).await.unwrap();
        let capture: CapturedRequest =
            serde_json::from_str(r#"{"url": "https://example.com/a"}"#).unwrap();
        mgr.record_request(Some(&session.id), &capture)
            .await
            .unwrap();

        let exports = dir.path().join("exports");
        let sessions_csv = mgr
            .export_sessions(ExportFormat::Csv, &exports)
            .await
            .unwrap();
        let text = std::fs::read_to_string(&sessions_csv).unwrap();
        assert!(text.starts_with("ID,Domain,Username,Created,Last Used"));
        assert!(text.contains("example.com"));

        let requests_csv = sessions_csv
            .to_string_lossy()
            .replace("_sessions.csv", "_requests.csv");
        let text = std::fs::read_to_string(requests_csv).unwrap();
        assert!(text.contains("https://example.com/a"));
    }
}
