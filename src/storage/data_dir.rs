//! Filesystem layout under the `~/.turboX` tree.
//!
//! The desktop tools read these files directly, so names and shapes are part
//! of the contract: request dumps and login templates under `data/`, CAPTCHA
//! images under `captchas/`, the SMS store under `tools/`, exports under
//! `exports/`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;

use crate::capture::types::CapturedRequest;
use crate::error_handling::types::CaptureError;
use crate::session_management::types::short_hash;

#[derive(Debug, Clone)]
pub struct DataDir {
    data: PathBuf,
    captchas: PathBuf,
    tools: PathBuf,
    exports: PathBuf,
}

impl DataDir {
    /// Build the layout rooted at the config directory, with the request
    /// data directory optionally relocated (config `storage.data_dir`).
    pub fn new(config_dir: &Path, data_dir: PathBuf) -> Self {
        Self {
            data: data_dir,
            captchas: config_dir.join("captchas"),
            tools: config_dir.join("tools"),
            exports: config_dir.join("exports"),
        }
    }

    pub fn captcha_dir(&self) -> &Path {
        &self.captchas
    }

    pub fn sms_store_path(&self) -> PathBuf {
        self.tools.join("sms_data.json")
    }

    pub fn export_dir(&self) -> &Path {
        &self.exports
    }

    pub fn export_path(&self, filename: &str) -> PathBuf {
        self.exports.join(filename)
    }

    /// Dump one captured request to `data/request_<ts>_<fp>.json`.
    ///
    /// The filename suffix is a 4-digit fingerprint of the request content,
    /// which keeps two captures in the same second from clobbering each
    /// other.
    pub fn dump_request(&self, request: &CapturedRequest) -> Result<PathBuf, CaptureError> {
        let serialized = serde_json::to_string_pretty(request)
            .map_err(|e| CaptureError::DumpFailed(std::io::Error::other(e)))?;
        let fp = content_fingerprint(&serialized);
        let filename = format!(
            "request_{}_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S"),
            fp
        );
        fs::create_dir_all(&self.data).map_err(CaptureError::DumpFailed)?;
        let path = self.data.join(filename);
        fs::write(&path, serialized).map_err(CaptureError::DumpFailed)?;
        debug!("Dumped captured request to {}", path.display());
        Ok(path)
    }

    /// Every `request_*.json` dump currently on disk, parsed. Unreadable or
    /// corrupt files are skipped with a warning.
    pub fn request_dumps(&self) -> Vec<Value> {
        let entries = match fs::read_dir(&self.data) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut dumps = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("request_") || !name.ends_with(".json") {
                continue;
            }
            match fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|text| {
                serde_json::from_str::<Value>(&text).map_err(|e| e.to_string())
            }) {
                Ok(value) => dumps.push(value),
                Err(e) => warn!("Skipping unreadable dump {}: {}", path.display(), e),
            }
        }
        dumps
    }

    pub fn login_template_path(&self, domain: &str) -> PathBuf {
        self.data
            .join(format!("login_{}.json", domain.replace('.', "_")))
    }

    /// Persist the login template for a domain, overwriting any previous one.
    pub fn save_login_template(&self, domain: &str, template: &Value) -> Result<(), CaptureError> {
        fs::create_dir_all(&self.data).map_err(CaptureError::DumpFailed)?;
        let path = self.login_template_path(domain);
        let text = serde_json::to_string_pretty(template)
            .map_err(|e| CaptureError::DumpFailed(std::io::Error::other(e)))?;
        fs::write(&path, text).map_err(CaptureError::DumpFailed)?;
        debug!("Login template saved for {}", domain);
        Ok(())
    }

    /// Read a JSON file into a deserializable value, `None` when missing or
    /// corrupt.
    pub fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Write a serializable value as pretty JSON, creating parents.
    pub fn write_json<T: serde::Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), CaptureError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(CaptureError::DumpFailed)?;
        }
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| CaptureError::DumpFailed(std::io::Error::other(e)))?;
        fs::write(path, text).map_err(CaptureError::DumpFailed)?;
        Ok(())
    }
}

/// 4-digit fingerprint of serialized request content.
fn content_fingerprint(serialized: &str) -> u32 {
    u32::from_str_radix(&short_hash(serialized, 8), 16).unwrap_or(0) % 10000
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> DataDir {
        DataDir::new(dir.path(), dir.path().join("data"))
    }

    fn capture(url: &str) -> CapturedRequest {
        serde_json::from_str(&format!(r#"{{"url": "{}"}}"#, url)).unwrap()
    }

    #[test]
    fn test_dump_and_list_requests() {
        let dir = TempDir::new().unwrap();
        let data = layout(&dir);

        let path_a = data.dump_request(&capture("https://a.example/x")).unwrap();
        let path_b = data.dump_request(&capture("https://b.example/y")).unwrap();
        assert_ne!(path_a, path_b);
        assert!(path_a.file_name().unwrap().to_string_lossy().starts_with("request_"));

        // A stray corrupt dump is skipped, not fatal
        fs::write(dir.path().join("data").join("request_bad.json"), "{oops").unwrap();

        let dumps = data.request_dumps();
        assert_eq!(dumps.len(), 2);
    }

    #[test]
    fn test_request_dumps_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path(), dir.path().join("never_created"));
        assert!(data.request_dumps().is_empty());
    }

    #[test]
    fn test_login_template_roundtrip() {
        let dir = TempDir::new().unwrap();
        let data = layout(&dir);

        let template = serde_json::json!({"login_url": "https://shop.example.com/login"});
        data.save_login_template("shop.example.com", &template).unwrap();

        let path = data.login_template_path("shop.example.com");
        assert!(path.to_string_lossy().ends_with("login_shop_example_com.json"));
        let loaded: Value = data.read_json(&path).unwrap();
        assert_eq!(loaded, template);
    }
}
