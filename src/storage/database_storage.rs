use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::capture::types::StoredRequest;
use crate::configuration::config::Config;
use crate::error_handling::types::StorageError;
use crate::session_management::types::{CaptchaRecord, DomainSession};
use crate::storage::storage_trait::Store;

/// Parse a JSON text column into a string map, empty on anything unparseable.
fn parse_string_map(raw: Option<&str>) -> HashMap<String, String> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

/// Parse a JSON text column into an object, empty on anything unparseable.
fn parse_object(raw: Option<&str>) -> Map<String, Value> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::ReadFailed)
}

// Internal row mapping for sessions to avoid manual try_get
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    domain: String,
    username: Option<String>,
    email: Option<String>,
    cookies: Option<String>,
    tokens: Option<String>,
    headers: Option<String>,
    login_data: Option<String>,
    created_at: String,
    last_used: String,
    expires_at: String,
    is_active: i64,
    metadata: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<DomainSession, StorageError> {
        Ok(DomainSession {
            id: self.id,
            domain: self.domain,
            username: self.username,
            email: self.email,
            cookies: parse_string_map(self.cookies.as_deref()),
            tokens: parse_string_map(self.tokens.as_deref()),
            headers: parse_string_map(self.headers.as_deref()),
            login_data: parse_object(self.login_data.as_deref()),
            created_at: parse_rfc3339(&self.created_at)?,
            last_used: parse_rfc3339(&self.last_used)?,
            expires_at: parse_rfc3339(&self.expires_at)?,
            is_active: self.is_active != 0,
            metadata: parse_object(self.metadata.as_deref()),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: String,
    session_id: Option<String>,
    url: String,
    method: Option<String>,
    request_headers: Option<String>,
    request_body: Option<String>,
    response_headers: Option<String>,
    response_body: Option<String>,
    status_code: Option<i64>,
    timestamp: String,
}

impl RequestRow {
    fn into_request(self) -> Result<StoredRequest, StorageError> {
        Ok(StoredRequest {
            id: self.id,
            session_id: self.session_id,
            url: self.url,
            method: self.method,
            request_headers: parse_object(self.request_headers.as_deref()),
            request_body: self.request_body.unwrap_or_default(),
            response_headers: parse_object(self.response_headers.as_deref()),
            response_body: self.response_body.unwrap_or_default(),
            status_code: self.status_code,
            timestamp: parse_rfc3339(&self.timestamp)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CaptchaRow {
    id: String,
    captcha_type: String,
    question: Option<String>,
    image_path: Option<String>,
    solution: String,
    solved_at: String,
    used_count: i64,
    success_rate: f64,
}

impl CaptchaRow {
    fn into_record(self) -> Result<CaptchaRecord, StorageError> {
        Ok(CaptchaRecord {
            id: self.id,
            captcha_type: self.captcha_type,
            question: self.question,
            image_path: self.image_path,
            solution: self.solution,
            solved_at: parse_rfc3339(&self.solved_at)?,
            used_count: self.used_count,
            success_rate: self.success_rate,
        })
    }
}

/// SQLite-backed [`Store`].
///
/// Sessions, captured requests and CAPTCHA solutions each get a table; the
/// map-valued session fields are stored as JSON text so the database stays
/// readable with plain sqlite tooling.
pub struct DatabaseStore {
    pool: Pool<Sqlite>,
}

impl DatabaseStore {
    /// Database filename under the config directory.
    const DEFAULT_DB_FILE: &'static str = "sessions.db";

    /// Open (or create) the database at the configured location.
    pub async fn open_default() -> Result<Self, StorageError> {
        let path = Config::config_dir()
            .map(|dir| dir.join(Self::DEFAULT_DB_FILE))
            .map_err(|_| StorageError::ConnectionFailed)?;
        Self::open(path).await
    }

    /// Open (or create) the database at `path`, creating parent directories
    /// and the schema as needed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path_ref)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|_| StorageError::ConnectionFailed)?;
        // ensure foreign keys
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
        // create schema
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                username TEXT,
                email TEXT,
                cookies TEXT,
                tokens TEXT,
                headers TEXT,
                login_data TEXT,
                created_at TEXT NOT NULL,
                last_used TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                is_active INTEGER DEFAULT 1,
                metadata TEXT
            );",
        )
        .execute(&pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS captured_requests (
                id TEXT PRIMARY KEY,
                session_id TEXT,
                url TEXT NOT NULL,
                method TEXT,
                request_headers TEXT,
                request_body TEXT,
                response_headers TEXT,
                response_body TEXT,
                status_code INTEGER,
                timestamp TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id)
            );",
        )
        .execute(&pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS captcha_solutions (
                id TEXT PRIMARY KEY,
                captcha_type TEXT,
                question TEXT,
                image_path TEXT,
                solution TEXT,
                solved_at TEXT,
                used_count INTEGER DEFAULT 0,
                success_rate REAL DEFAULT 0.0
            );",
        )
        .execute(&pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        Ok(Self { pool })
    }

    fn json_text(map: &HashMap<String, String>) -> Result<String, StorageError> {
        serde_json::to_string(map).map_err(|_| StorageError::WriteFailed)
    }

    fn object_text(map: &Map<String, Value>) -> Result<String, StorageError> {
        serde_json::to_string(map).map_err(|_| StorageError::WriteFailed)
    }
}

#[async_trait]
impl Store for DatabaseStore {
    async fn save_session(&self, session: &DomainSession) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sessions (id, domain, username, email, cookies, tokens, headers, login_data, created_at, last_used, expires_at, is_active, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
               domain=excluded.domain,
               username=excluded.username,
               email=excluded.email,
               cookies=excluded.cookies,
               tokens=excluded.tokens,
               headers=excluded.headers,
               login_data=excluded.login_data,
               created_at=excluded.created_at,
               last_used=excluded.last_used,
               expires_at=excluded.expires_at,
               is_active=excluded.is_active,
               metadata=excluded.metadata",
        )
        .bind(&session.id)
        .bind(&session.domain)
        .bind(&session.username)
        .bind(&session.email)
        .bind(Self::json_text(&session.cookies)?)
        .bind(Self::json_text(&session.tokens)?)
        .bind(Self::json_text(&session.headers)?)
        .bind(Self::object_text(&session.login_data)?)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_used.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.is_active as i64)
        .bind(Self::object_text(&session.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<DomainSession>, StorageError> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| StorageError::ReadFailed)?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn latest_session_for_domain(
        &self,
        domain: &str,
    ) -> Result<Option<DomainSession>, StorageError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE domain = ?1 AND is_active = 1 ORDER BY last_used DESC LIMIT 1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query("UPDATE sessions SET last_used = ?1 WHERE id = ?2")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
        Ok(())
    }

    async fn all_sessions(&self) -> Result<Vec<DomainSession>, StorageError> {
        let rows: Vec<SessionRow> = sqlx::query_as("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_session()?);
        }
        Ok(out)
    }

    async fn sessions_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DomainSession>, StorageError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE expires_at < ?1 AND is_active = 1",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_session()?);
        }
        Ok(out)
    }

    async fn save_request(&self, request: &StoredRequest) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO captured_requests (id, session_id, url, method, request_headers, request_body, response_headers, response_body, status_code, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               session_id=excluded.session_id,
               url=excluded.url,
               method=excluded.method,
               request_headers=excluded.request_headers,
               request_body=excluded.request_body,
               response_headers=excluded.response_headers,
               response_body=excluded.response_body,
               status_code=excluded.status_code,
               timestamp=excluded.timestamp",
        )
        .bind(&request.id)
        .bind(&request.session_id)
        .bind(&request.url)
        .bind(&request.method)
        .bind(Self::object_text(&request.request_headers)?)
        .bind(&request.request_body)
        .bind(Self::object_text(&request.response_headers)?)
        .bind(&request.response_body)
        .bind(request.status_code)
        .bind(request.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        Ok(())
    }

    async fn requests_for_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, StorageError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT * FROM captured_requests WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_request()?);
        }
        Ok(out)
    }

    async fn recent_requests(&self, limit: u32) -> Result<Vec<StoredRequest>, StorageError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT * FROM captured_requests ORDER BY timestamp DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_request()?);
        }
        Ok(out)
    }

    async fn login_requests_for_domain(
        &self,
        domain: &str,
        limit: u32,
    ) -> Result<Vec<StoredRequest>, StorageError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT * FROM captured_requests
             WHERE url LIKE ?1 AND request_body LIKE '%password%'
             ORDER BY timestamp DESC LIMIT ?2",
        )
        .bind(format!("%{}%", domain))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_request()?);
        }
        Ok(out)
    }

    async fn record_captcha_solution(&self, record: &CaptchaRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO captcha_solutions (id, captcha_type, question, image_path, solution, solved_at, used_count, success_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
             ON CONFLICT(id) DO UPDATE SET
               captcha_type=excluded.captcha_type,
               question=excluded.question,
               image_path=excluded.image_path,
               solution=excluded.solution,
               solved_at=excluded.solved_at,
               used_count=captcha_solutions.used_count + 1",
        )
        .bind(&record.id)
        .bind(&record.captcha_type)
        .bind(&record.question)
        .bind(&record.image_path)
        .bind(&record.solution)
        .bind(record.solved_at.to_rfc3339())
        .bind(record.success_rate)
        .execute(&self.pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        Ok(())
    }

    async fn all_captcha_solutions(&self) -> Result<Vec<CaptchaRecord>, StorageError> {
        let rows: Vec<CaptchaRow> = sqlx::query_as("SELECT * FROM captcha_solutions")
            .fetch_all(&self.pool)
            .await
            .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_record()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn temp_db() -> DatabaseStore {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("test.sqlite3");
        // Keep TempDir alive by leaking it for the test duration
        Box::leak(Box::new(dir));
        DatabaseStore::open(path).await.unwrap()
    }

    fn sample_session(domain: &str) -> DomainSession {
        let mut session = DomainSession::new(domain, None);
        session
            .cookies
            .insert("sessionid".to_string(), "abc".to_string());
        session
            .tokens
            .insert("access_token".to_string(), "tok-123456789".to_string());
        session
    }

    #[tokio::test]
    async fn test_session_roundtrip_and_upsert() {
        let store = temp_db().await;
        let mut session = sample_session("example.com");
        store.save_session(&session).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.domain, "example.com");
        assert_eq!(loaded.cookies.get("sessionid").map(String::as_str), Some("abc"));
        assert!(loaded.is_active);

        session.username = Some("alice".into());
        session.is_active = false;
        store.save_session(&session).await.unwrap();
        let updated = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(updated.username.as_deref(), Some("alice"));
        assert!(!updated.is_active);

        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_session_for_domain() {
        let store = temp_db().await;
        let mut older = sample_session("example.com");
        older.last_used = Utc::now() - chrono::Duration::hours(2);
        let newer = sample_session("example.com");
        let other = sample_session("other.org");
        let mut inactive = sample_session("example.com");
        inactive.is_active = false;
        inactive.last_used = Utc::now() + chrono::Duration::hours(1);

        for s in [&older, &newer, &other, &inactive] {
            store.save_session(s).await.unwrap();
        }

        let found = store
            .latest_session_for_domain("example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);

        assert!(store
            .latest_session_for_domain("nowhere.net")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_touch_session_bumps_last_used() {
        let store = temp_db().await;
        let session = sample_session("example.com");
        store.save_session(&session).await.unwrap();

        let later = session.last_used + chrono::Duration::minutes(5);
        store.touch_session(&session.id, later).await.unwrap();
        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_used, later);
    }

    #[tokio::test]
    async fn test_requests_ordering_and_limit() {
        let store = temp_db().await;
        let session = sample_session("example.com");
        store.save_session(&session).await.unwrap();

        let base = Utc::now();
        for i in 0..5 {
            let request = StoredRequest {
                id: format!("req-{}", i),
                session_id: Some(session.id.clone()),
                url: format!("https://example.com/{}", i),
                method: Some("GET".into()),
                request_headers: Map::new(),
                request_body: String::new(),
                response_headers: Map::new(),
                response_body: String::new(),
                status_code: Some(200),
                timestamp: base + chrono::Duration::seconds(i),
            };
            store.save_request(&request).await.unwrap();
        }

        let recent = store
            .requests_for_session(&session.id, 3)
            .await
            .unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, "req-4");
        assert_eq!(recent[2].id, "req-2");

        let all_recent = store.recent_requests(100).await.unwrap();
        assert_eq!(all_recent.len(), 5);
    }

    #[tokio::test]
    async fn test_login_requests_filter() {
        let store = temp_db().await;
        let session = sample_session("shop.example.com");
        store.save_session(&session).await.unwrap();

        let login = StoredRequest {
            id: "login-1".into(),
            session_id: Some(session.id.clone()),
            url: "https://shop.example.com/login".into(),
            method: Some("POST".into()),
            request_headers: Map::new(),
            request_body: r#"{"username":"a","password":"b"}"#.into(),
            response_headers: Map::new(),
            response_body: String::new(),
            status_code: Some(200),
            timestamp: Utc::now(),
        };
        let plain = StoredRequest {
            id: "plain-1".into(),
            request_body: String::new(),
            url: "https://shop.example.com/items".into(),
            ..login.clone()
        };
        store.save_request(&login).await.unwrap();
        store.save_request(&plain).await.unwrap();

        let patterns = store
            .login_requests_for_domain("shop.example.com", 5)
            .await
            .unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].id, "login-1");
    }

    #[tokio::test]
    async fn test_captcha_used_count_increments() {
        let store = temp_db().await;
        let record = CaptchaRecord {
            id: "cap-1".into(),
            captcha_type: "math".into(),
            question: Some("What is 2 plus 2?".into()),
            image_path: None,
            solution: "4".into(),
            solved_at: Utc::now(),
            used_count: 0,
            success_rate: 0.0,
        };
        store.record_captcha_solution(&record).await.unwrap();
        store.record_captcha_solution(&record).await.unwrap();
        store.record_captcha_solution(&record).await.unwrap();

        let all = store.all_captcha_solutions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].used_count, 3);
        assert_eq!(all[0].solution, "4");
    }

    #[tokio::test]
    async fn test_expiring_sessions_query() {
        let store = temp_db().await;
        let mut expiring = sample_session("soon.example.com");
        expiring.expires_at = Utc::now() + chrono::Duration::minutes(30);
        let healthy = sample_session("later.example.com");
        store.save_session(&expiring).await.unwrap();
        store.save_session(&healthy).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::hours(1);
        let found = store.sessions_expiring_before(cutoff).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expiring.id);
    }

    #[tokio::test]
    async fn test_corrupt_json_columns_read_as_empty() {
        let store = temp_db().await;
        let session = sample_session("example.com");
        store.save_session(&session).await.unwrap();
        sqlx::query("UPDATE sessions SET cookies = 'not json', metadata = NULL WHERE id = ?1")
            .bind(&session.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert!(loaded.cookies.is_empty());
        assert!(loaded.metadata.is_empty());
        assert!(!loaded.tokens.is_empty());
    }
}
