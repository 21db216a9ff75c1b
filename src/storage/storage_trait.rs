//! Store Trait
//!
//! This module defines the `Store` trait, the interface every persistence
//! backend implements.
//!
//! Implementors of this trait are responsible for:
//! - Persisting and retrieving domain sessions
//! - Persisting captured requests and serving query views over them
//! - Recording CAPTCHA solutions
//!
//! All methods return a `Result` to handle potential storage errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::capture::types::StoredRequest;
use crate::error_handling::types::StorageError;
use crate::session_management::types::{CaptchaRecord, DomainSession};

/// The `Store` trait defines the interface for session and capture
/// persistence backends.
///
/// The session manager keeps a write-through cache in front of a `Store`;
/// every mutation lands here so a restart loses nothing but the in-memory
/// CAPTCHA cache.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a session (matched on id).
    async fn save_session(&self, session: &DomainSession) -> Result<(), StorageError>;

    /// Fetch one session by id.
    async fn get_session(&self, id: &str) -> Result<Option<DomainSession>, StorageError>;

    /// The most recently used active session for a domain.
    async fn latest_session_for_domain(
        &self,
        domain: &str,
    ) -> Result<Option<DomainSession>, StorageError>;

    /// Bump a session's `last_used` timestamp.
    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Every stored session, active or not.
    async fn all_sessions(&self) -> Result<Vec<DomainSession>, StorageError>;

    /// Active sessions whose `expires_at` lies before `cutoff`.
    async fn sessions_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DomainSession>, StorageError>;

    /// Insert or update a captured request (matched on id).
    async fn save_request(&self, request: &StoredRequest) -> Result<(), StorageError>;

    /// Requests recorded against a session, newest first.
    async fn requests_for_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, StorageError>;

    /// Most recent requests across all sessions, newest first.
    async fn recent_requests(&self, limit: u32) -> Result<Vec<StoredRequest>, StorageError>;

    /// Recent requests against a domain whose body mentions a password
    /// field. These serve as login templates for replay.
    async fn login_requests_for_domain(
        &self,
        domain: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, StorageError>;

    /// Insert or update a CAPTCHA solution. The stored `used_count` is
    /// incremented on every call regardless of the value in `record`.
    async fn record_captcha_solution(&self, record: &CaptchaRecord) -> Result<(), StorageError>;

    /// Every recorded CAPTCHA solution.
    async fn all_captcha_solutions(&self) -> Result<Vec<CaptchaRecord>, StorageError>;
}
