use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::error_handling::types::ConfigError;

/// Runtime configuration loaded from `automation.json`.
///
/// The file lives at `<config_dir>/config/automation.json` where the config
/// directory is `$TURBOX_CONFIG_DIR` when set, otherwise `$HOME/.turboX`.
/// Tools edit the same file, so loading is deliberately forgiving: a missing
/// file yields the defaults, missing sections or keys are filled from the
/// defaults, and a corrupt file is logged and replaced by the defaults rather
/// than aborting the daemon.
///
/// # Fields Overview
///
/// - `auto_launch`: which tools start automatically, and whether a browser
///   connection launches everything
/// - `automation_rules`: toggles for CAPTCHA solving, session maintenance and
///   periodic exports applied to captured traffic
/// - `browser_integration`: HTTP API port (the TCP relay binds port + 1)
/// - `storage`: database/data-dir overrides and external tool commands
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_launch: AutoLaunch,
    #[serde(default)]
    pub automation_rules: AutomationRules,
    #[serde(default)]
    pub browser_integration: BrowserIntegration,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Config {
    /// Config file location relative to the config directory.
    const CONFIG_FILE: &'static str = "config/automation.json";

    /// Resolve the base config directory.
    ///
    /// `TURBOX_CONFIG_DIR` takes precedence so tests and alternate installs
    /// can relocate everything; otherwise the directory is `~/.turboX`.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("TURBOX_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var("HOME").map_err(|_| ConfigError::HomeNotFound)?;
        Ok(PathBuf::from(home).join(".turboX"))
    }

    /// Load the configuration from the standard location.
    pub fn load() -> Result<Self, ConfigError> {
        let dir = Self::config_dir()?;
        Ok(Self::from_file(&dir.join(Self::CONFIG_FILE)))
    }

    /// Load the configuration from an explicit path.
    ///
    /// Read or parse failures fall back to the defaults; only the absence of
    /// the file is silent, everything else is logged.
    pub fn from_file(path: &Path) -> Self {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Configuration loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Config parse error in {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Config read error for {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the configuration back to the standard location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = Self::config_dir()?;
        self.save_to(&dir.join(Self::CONFIG_FILE))
    }

    /// Write the configuration to an explicit path, creating parent
    /// directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::DirectoryCreateFailed(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::JsonError(e.to_string()))?;
        fs::write(path, json)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Resolved SQLite database path.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("sessions.db")),
        }
    }

    /// Resolved captured-request data directory.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("data")),
        }
    }

    /// Command line used to launch the named tool.
    ///
    /// Falls back to `python3 <config_dir>/scripts/<tool>.py` when the tool
    /// has no override in `storage.tools`.
    pub fn tool_command(&self, tool: &str) -> Result<Vec<String>, ConfigError> {
        if let Some(argv) = self.storage.tools.get(tool) {
            if !argv.is_empty() {
                return Ok(argv.clone());
            }
        }
        let script = Self::config_dir()?
            .join("scripts")
            .join(format!("{}.py", tool));
        Ok(vec![
            "python3".to_string(),
            script.to_string_lossy().into_owned(),
        ])
    }
}

/// Create the standard directory tree under the config directory.
///
/// Missing directories are created, existing ones are left alone.
pub fn ensure_directories(base: &Path) -> Result<(), ConfigError> {
    for sub in [
        "config", "scripts", "tools", "logs", "data", "captchas", "exports",
    ] {
        let dir = base.join(sub);
        fs::create_dir_all(&dir)
            .map_err(|e| ConfigError::DirectoryCreateFailed(format!("{}: {}", dir.display(), e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.auto_launch.api_tester);
        assert!(config.auto_launch.sms_panel);
        assert!(config.auto_launch.on_browser_connect);
        assert!(config.automation_rules.auto_captcha);
        assert!(config.automation_rules.auto_session);
        assert!(!config.automation_rules.auto_data_export);
        assert_eq!(config.automation_rules.auto_refresh, 300);
        assert_eq!(config.browser_integration.port, 8765);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_file(&dir.path().join("nope.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("automation.json");
        fs::write(&path, "{not json").unwrap();
        let config = Config::from_file(&path);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_missing_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("automation.json");
        fs::write(
            &path,
            r#"{"browser_integration": {"port": 9001}, "automation_rules": {"auto_captcha": false}}"#,
        )
        .unwrap();
        let config = Config::from_file(&path);
        assert_eq!(config.browser_integration.port, 9001);
        assert!(config.browser_integration.auto_connect);
        assert!(!config.automation_rules.auto_captcha);
        assert_eq!(config.automation_rules.auto_refresh, 300);
        assert_eq!(config.auto_launch, AutoLaunch::default());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("automation.json");
        let mut config = Config::default();
        config.browser_integration.port = 9100;
        config.automation_rules.auto_data_export = true;
        config.save_to(&path).unwrap();
        let loaded = Config::from_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    #[serial]
    fn test_config_dir_env_override() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TURBOX_CONFIG_DIR", dir.path());
        let resolved = Config::config_dir().unwrap();
        assert_eq!(resolved, dir.path());
        std::env::remove_var("TURBOX_CONFIG_DIR");
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        ensure_directories(dir.path()).unwrap();
        for sub in ["config", "data", "captchas", "exports", "tools"] {
            assert!(dir.path().join(sub).is_dir());
        }
        // Second run is a no-op
        ensure_directories(dir.path()).unwrap();
    }

    #[test]
    fn test_tool_command_override() {
        let mut config = Config::default();
        config.storage.tools.insert(
            "api_tester".to_string(),
            vec!["/usr/bin/api-tester".to_string(), "--headless".to_string()],
        );
        let argv = config.tool_command("api_tester").unwrap();
        assert_eq!(argv[0], "/usr/bin/api-tester");
        assert_eq!(argv.len(), 2);
    }
}
