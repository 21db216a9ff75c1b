use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which tools start automatically and whether a browser connection
/// triggers a full launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoLaunch {
    #[serde(default = "default_true")]
    pub api_tester: bool,
    #[serde(default = "default_true")]
    pub sms_panel: bool,
    #[serde(default = "default_true")]
    pub on_browser_connect: bool,
}

impl Default for AutoLaunch {
    fn default() -> Self {
        Self {
            api_tester: true,
            sms_panel: true,
            on_browser_connect: true,
        }
    }
}

/// Toggles for the automatic processing steps applied to captured traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRules {
    #[serde(default = "default_true")]
    pub auto_captcha: bool,
    #[serde(default = "default_true")]
    pub auto_session: bool,
    #[serde(default)]
    pub auto_data_export: bool,
    /// Refresh interval in seconds for periodic automation work.
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: u64,
}

impl Default for AutomationRules {
    fn default() -> Self {
        Self {
            auto_captcha: true,
            auto_session: true,
            auto_data_export: false,
            auto_refresh: default_auto_refresh(),
        }
    }
}

/// Browser extension connectivity settings.
///
/// The HTTP API listens on `port`; the TCP relay listens on `port + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserIntegration {
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

impl Default for BrowserIntegration {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
            auto_connect: true,
        }
    }
}

/// Storage locations and external tool commands.
///
/// `db_path` and `data_dir` default to paths under the config directory when
/// unset. `tools` maps a tool name to the argv used to launch it; tools not
/// listed fall back to `python3 <config_dir>/scripts/<tool>.py`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub tools: HashMap<String, Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_auto_refresh() -> u64 {
    300
}

fn default_bridge_port() -> u16 {
    8765
}
