//! Storage subsystem
//!
//! This module provides abstractions and implementations for persisting
//! sessions, captured requests, and CAPTCHA solutions.
//!
//! Components:
//! - `storage_trait`: the Store trait defining a uniform API.
//! - `database_storage`: sqlx-based SQLite implementation.
//! - `memory_storage`: in-memory implementation for tests and ephemeral runs.
//! - `data_dir`: the on-disk layout shared with the desktop tools.

pub mod data_dir;
pub mod database_storage;
pub mod memory_storage;
pub mod storage_trait;

pub use data_dir::DataDir;
pub use database_storage::DatabaseStore;
pub use memory_storage::MemoryStore;
pub use storage_trait::Store;
