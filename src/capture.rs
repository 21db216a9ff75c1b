//! Capture pipeline.
//!
//! Batches of requests captured by the browser extension flow through this
//! module: each request is dumped to disk, attached to its domain session,
//! mined for tokens, logins, and SMS messages, and can later be exported
//! per tool.

/// Submodule rendering per-tool exports (JSON/CSV).
pub mod exporter;
/// Submodule running the per-request processing pipeline.
pub mod processor;
/// Submodule for SMS extraction and the shared SMS store.
pub mod sms;
/// Submodule holding the wire and row types for captured traffic.
pub mod types;

pub use processor::{BatchOutcome, CaptureProcessor};
pub use types::{CapturedRequest, ExportFormat, StoredRequest};
