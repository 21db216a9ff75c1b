//! turboX hub: the desktop-side daemon behind the turboX browser tools.
//!
//! The hub receives traffic captured by the browser extension, maintains
//! per-domain sessions (cookies, tokens, login templates), solves simple
//! CAPTCHAs, and relays data to the desktop tools it supervises.
//!
//! Subsystems:
//! - [`configuration`]: the `~/.turboX` config file and directory layout
//! - [`storage`]: SQLite persistence and the shared on-disk data layout
//! - [`session_management`]: per-domain sessions, token extraction, CAPTCHAs
//! - [`capture`]: the processing pipeline for captured requests
//! - [`bridge`]: the HTTP API and TCP relay the extension and tools talk to
//! - [`controller`]: daemon assembly and tool process supervision

pub mod bridge;
pub mod capture;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod session_management;
pub mod storage;
