pub mod config;
pub mod types;

pub use config::{ensure_directories, Config};
pub use types::{AutoLaunch, AutomationRules, BrowserIntegration, StorageSettings};
