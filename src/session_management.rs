//! Session management core module.
//!
//! This module provides the types and submodules for managing per-domain web
//! sessions: creation and lookup, token/cookie extraction from captured
//! traffic, CAPTCHA solving with a short-lived solution cache, and exports.

/// Submodule for CAPTCHA solving and the solution cache.
pub mod captcha;
/// Submodule for the session manager implementation.
pub mod session_manager;
/// Submodule for the cookie/token extraction heuristics.
pub mod token_extraction;
/// Submodule for session data structures and identifiers.
pub mod types;

pub use session_manager::SessionManager;
pub use types::{CaptchaChallenge, DomainSession, SessionCredentials, SessionUpdate};
