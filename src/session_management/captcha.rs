//! CAPTCHA solving and the short-lived solution cache.
//!
//! Math challenges are solved by pulling all integers out of the question
//! text and applying the first operator keyword found; image challenges are
//! written to disk and flagged for manual solving. Solutions are cached in
//! memory for five minutes keyed by a fingerprint of the challenge, and every
//! produced solution is also recorded in the `captcha_solutions` table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use log::{info, warn};
use regex::Regex;

use crate::error_handling::types::CaptchaError;
use crate::session_management::types::{
    short_hash, CaptchaChallenge, CaptchaKind, CaptchaRecord,
};
use crate::storage::storage_trait::Store;

/// In-memory cache lifetime for solved challenges.
const CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    solution: String,
    inserted: Instant,
}

/// Solves CAPTCHA challenges and remembers recent solutions.
///
/// The cache lives only in memory; the database rows are a record of
/// outcomes (with use counts), not a persistence of the cache TTL.
pub struct CaptchaSolver {
    store: std::sync::Arc<dyn Store>,
    captcha_dir: PathBuf,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CaptchaSolver {
    pub fn new(store: std::sync::Arc<dyn Store>, captcha_dir: PathBuf) -> Self {
        Self {
            store,
            captcha_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Solve a challenge, consulting the cache first.
    ///
    /// Returns `None` when the challenge cannot be solved; an image challenge
    /// that was saved for manual solving returns `MANUAL:<path>`. A challenge
    /// with neither question nor image has no fingerprint and is never
    /// cached.
    pub async fn solve(&self, challenge: &CaptchaChallenge) -> Option<String> {
        let fingerprint = fingerprint(challenge);

        if let Some(key) = &fingerprint {
            if let Some(hit) = self.cache_lookup(key) {
                info!("Using cached CAPTCHA solution");
                return Some(hit);
            }
        }

        let solution = match challenge.kind {
            CaptchaKind::Math => challenge.question.as_deref().and_then(solve_math),
            CaptchaKind::Image => match self.solve_image(challenge) {
                Ok(solution) => solution,
                Err(e) => {
                    warn!("CAPTCHA image processing error: {}", e);
                    None
                }
            },
            CaptchaKind::Unknown => None,
        };

        if let (Some(solution), Some(key)) = (&solution, &fingerprint) {
            self.cache_insert(key, solution);
            self.record(challenge, solution).await;
        }

        solution
    }

    fn cache_lookup(&self, key: &str) -> Option<String> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(key)?;
        if entry.inserted.elapsed() < CACHE_TTL {
            Some(entry.solution.clone())
        } else {
            None
        }
    }

    fn cache_insert(&self, key: &str, solution: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key.to_string(),
                CacheEntry {
                    solution: solution.to_string(),
                    inserted: Instant::now(),
                },
            );
        }
    }

    /// Decode and save an image challenge, then consult the external service
    /// placeholder. No service is wired up, so the result is always a
    /// `MANUAL:<path>` marker pointing at the saved file.
    fn solve_image(&self, challenge: &CaptchaChallenge) -> Result<Option<String>, CaptchaError> {
        let image = match &challenge.image {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(None),
        };
        let bytes = BASE64
            .decode(image.as_bytes())
            .map_err(|e| CaptchaError::ImageDecodeFailed(e.to_string()))?;

        std::fs::create_dir_all(&self.captcha_dir)?;
        let path = self
            .captcha_dir
            .join(format!("captcha_{}.png", Utc::now().timestamp()));
        std::fs::write(&path, bytes)?;
        info!("CAPTCHA image saved: {}", path.display());

        if let Some(solution) = call_captcha_service(&path) {
            return Ok(Some(solution));
        }
        Ok(Some(format!("MANUAL:{}", path.display())))
    }

    /// Persist the solution; failures are logged, never escalated, so a
    /// broken database does not block answering the challenge.
    async fn record(&self, challenge: &CaptchaChallenge, solution: &str) {
        let serialized = serde_json::to_string(challenge).unwrap_or_default();
        let record = CaptchaRecord {
            id: short_hash(&serialized, 16),
            captcha_type: challenge.kind.as_str().to_string(),
            question: challenge.question.clone(),
            image_path: solution
                .strip_prefix("MANUAL:")
                .map(|path| path.to_string()),
            solution: solution.to_string(),
            solved_at: Utc::now(),
            used_count: 0,
            success_rate: 0.0,
        };
        if let Err(e) = self.store.record_captcha_solution(&record).await {
            warn!("Failed to record CAPTCHA solution: {}", e);
        }
    }
}

/// Challenge fingerprint: the SHA-256 hex of the question text, or the first
/// 32 hex characters over the base64 image payload when there is no question.
pub fn fingerprint(challenge: &CaptchaChallenge) -> Option<String> {
    if let Some(question) = challenge.question.as_deref().filter(|q| !q.is_empty()) {
        return Some(short_hash(question, 64));
    }
    if let Some(image) = challenge.image.as_deref().filter(|i| !i.is_empty()) {
        return Some(short_hash(image, 32));
    }
    None
}

fn integer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// Solve a math question like "What is 7 plus 3?".
///
/// All integers are extracted in order; at least two are required. The
/// operator is the first keyword found in a fixed probe order (add, subtract,
/// multiply, divide), matched as a substring of the lowercased question.
/// Division is integer division and yields nothing for a zero divisor.
pub fn solve_math(question: &str) -> Option<String> {
    let numbers: Vec<i64> = integer_regex()
        .find_iter(question)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if numbers.len() < 2 {
        return None;
    }
    let (a, b) = (numbers[0], numbers[1]);
    let lower = question.to_lowercase();

    if lower.contains("plus") || question.contains('+') {
        Some((a + b).to_string())
    } else if lower.contains("minus") || question.contains('-') {
        Some((a - b).to_string())
    } else if lower.contains("times") || question.contains('×') || question.contains('*') {
        Some((a * b).to_string())
    } else if lower.contains("divide") || question.contains('÷') || question.contains('/') {
        if b == 0 {
            None
        } else {
            Some((a / b).to_string())
        }
    } else {
        None
    }
}

/// External solving service hook (2Captcha, Anti-Captcha, ...). Not
/// configured; the image stays on disk for manual solving.
fn call_captcha_service(image_path: &std::path::Path) -> Option<String> {
    warn!(
        "External CAPTCHA service not configured; saved for manual solving: {}",
        image_path.display()
    );
    None
}
