//! In-memory [`Store`] backend.
//!
//! Keeps everything in mutex-guarded maps. Nothing survives a restart, which
//! makes it the backend of choice for tests and for running the daemon
//! without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::capture::types::StoredRequest;
use crate::error_handling::types::StorageError;
use crate::session_management::types::{CaptchaRecord, DomainSession};
use crate::storage::storage_trait::Store;

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, DomainSession>>,
    requests: Mutex<HashMap<String, StoredRequest>>,
    captchas: Mutex<HashMap<String, CaptchaRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_session(&self, session: &DomainSession) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().map_err(|_| StorageError::WriteFailed)?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<DomainSession>, StorageError> {
        let sessions = self.sessions.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(sessions.get(id).cloned())
    }

    async fn latest_session_for_domain(
        &self,
        domain: &str,
    ) -> Result<Option<DomainSession>, StorageError> {
        let sessions = self.sessions.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(sessions
            .values()
            .filter(|s| s.domain == domain && s.is_active)
            .max_by_key(|s| s.last_used)
            .cloned())
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().map_err(|_| StorageError::WriteFailed)?;
        if let Some(session) = sessions.get_mut(id) {
            session.last_used = at;
        }
        Ok(())
    }

    async fn all_sessions(&self) -> Result<Vec<DomainSession>, StorageError> {
        let sessions = self.sessions.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(sessions.values().cloned().collect())
    }

    async fn sessions_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DomainSession>, StorageError> {
        let sessions = self.sessions.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(sessions
            .values()
            .filter(|s| s.is_active && s.expires_at < cutoff)
            .cloned()
            .collect())
    }

    async fn save_request(&self, request: &StoredRequest) -> Result<(), StorageError> {
        let mut requests = self.requests.lock().map_err(|_| StorageError::WriteFailed)?;
        requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn requests_for_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, StorageError> {
        let requests = self.requests.lock().map_err(|_| StorageError::ReadFailed)?;
        let mut matching: Vec<StoredRequest> = requests
            .values()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn recent_requests(&self, limit: u32) -> Result<Vec<StoredRequest>, StorageError> {
        let requests = self.requests.lock().map_err(|_| StorageError::ReadFailed)?;
        let mut all: Vec<StoredRequest> = requests.values().cloned().collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit as usize);
        Ok(all)
    }

    async fn login_requests_for_domain(
        &self,
        domain: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, StorageError> {
        let requests = self.requests.lock().map_err(|_| StorageError::ReadFailed)?;
        let mut matching: Vec<StoredRequest> = requests
            .values()
            .filter(|r| r.url.contains(domain) && r.request_body.contains("password"))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn record_captcha_solution(&self, record: &CaptchaRecord) -> Result<(), StorageError> {
        let mut captchas = self.captchas.lock().map_err(|_| StorageError::WriteFailed)?;
        let used_count = captchas.get(&record.id).map(|r| r.used_count).unwrap_or(0) + 1;
        let mut stored = record.clone();
        stored.used_count = used_count;
        captchas.insert(record.id.clone(), stored);
        Ok(())
    }

    async fn all_captcha_solutions(&self) -> Result<Vec<CaptchaRecord>, StorageError> {
        let captchas = self.captchas.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(captchas.values().cloned().collect())
    }
}
