//! Per-tool data exports.
//!
//! Desktop tools can request a snapshot of "their" data through the relay;
//! this module renders those snapshots (request dumps for the API tester,
//! the SMS store for the SMS panel) as JSON or CSV files in the export
//! directory.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::Utc;
use log::{info, warn};
use serde_json::{json, Value};

use crate::capture::sms;
use crate::capture::types::ExportFormat;
use crate::error_handling::types::CaptureError;
use crate::storage::data_dir::DataDir;

/// Render one CSV row with a trailing newline. Fields containing commas,
/// quotes or newlines get quoted, with quotes doubled.
pub(crate) fn csv_row(fields: &[&str]) -> String {
    let mut row = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            row.push('"');
            row.push_str(&field.replace('"', "\"\""));
            row.push('"');
        } else {
            row.push_str(field);
        }
    }
    row.push('\n');
    row
}

/// Export a tool's data set, returning the written file's path.
///
/// Unknown tool names are logged and produce no file.
pub fn export_tool_data(
    tool: &str,
    format: ExportFormat,
    data: &DataDir,
) -> Result<Option<PathBuf>, CaptureError> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    match tool {
        "api_tester" => {
            let dumps = data.request_dumps();
            let path = match format {
                ExportFormat::Json => {
                    let path = data.export_path(&format!("api_requests_{}.json", stamp));
                    write_export(&path, &render_json(&Value::Array(dumps))?)?;
                    path
                }
                ExportFormat::Csv => {
                    let path = data.export_path(&format!("api_requests_{}.csv", stamp));
                    let mut out = csv_row(&["URL", "Method", "Status", "Time", "Size"]);
                    for dump in &dumps {
                        out.push_str(&request_csv_row(dump));
                    }
                    write_export(&path, &out)?;
                    path
                }
            };
            info!("API tester data exported to {}", path.display());
            Ok(Some(path))
        }
        "sms_panel" => {
            let store = sms::load_store(data);
            let path = match format {
                ExportFormat::Json => {
                    let path = data.export_path(&format!("sms_data_{}.json", stamp));
                    let dump = json!({
                        "messages": store.messages,
                        "stats": store.stats,
                        "exported_at": Utc::now(),
                    });
                    write_export(&path, &render_json(&dump)?)?;
                    path
                }
                ExportFormat::Csv => {
                    let path = data.export_path(&format!("sms_data_{}.csv", stamp));
                    let mut out = csv_row(&["From", "To", "Message", "Time", "Status"]);
                    for msg in &store.messages {
                        out.push_str(&csv_row(&[
                            &msg.from,
                            &msg.to,
                            &msg.body,
                            &msg.timestamp,
                            &msg.status,
                        ]));
                    }
                    write_export(&path, &out)?;
                    path
                }
            };
            info!("SMS panel data exported to {}", path.display());
            Ok(Some(path))
        }
        other => {
            warn!("No export defined for tool {:?}", other);
            Ok(None)
        }
    }
}

fn request_csv_row(dump: &Value) -> String {
    let text = |key: &str| match dump.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let size = match dump.get("responseBody") {
        Some(Value::String(s)) => s.len().to_string(),
        Some(Value::Null) | None => "0".to_string(),
        Some(other) => other.to_string().len().to_string(),
    };
    csv_row(&[
        &text("url"),
        &text("method"),
        &text("statusCode"),
        &text("timestamp"),
        &size,
    ])
}

fn render_json(value: &Value) -> Result<String, CaptureError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CaptureError::ExportFailed(io::Error::new(io::ErrorKind::InvalidData, e)))
}

fn write_export(path: &PathBuf, contents: &str) -> Result<(), CaptureError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(CaptureError::ExportFailed)?;
    }
    fs::write(path, contents).map_err(CaptureError::ExportFailed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{CapturedRequest, SmsMessage};
    use tempfile::TempDir;

    #[test]
    fn test_csv_row_escaping() {
        assert_eq!(csv_row(&["a", "b"]), "a,b\n");
        assert_eq!(csv_row(&["a,b", "c\"d"]), "\"a,b\",\"c\"\"d\"\n");
        assert_eq!(csv_row(&["line\nbreak"]), "\"line\nbreak\"\n");
    }

    #[test]
    fn test_api_tester_csv_export() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path(), dir.path().join("data"));
        let request: CapturedRequest = serde_json::from_value(serde_json::json!({
            "url": "https://example.com/api",
            "method": "GET",
            "statusCode": 200,
            "responseBody": "hello"
        }))
        .unwrap();
        data.dump_request(&request).unwrap();

        let path = export_tool_data("api_tester", ExportFormat::Csv, &data)
            .unwrap()
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("URL,Method,Status,Time,Size\n"));
        assert!(text.contains("https://example.com/api,GET,200,,5"));
    }

    #[test]
    fn test_sms_panel_json_export() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path(), dir.path().join("data"));
        sms::append_to_store(
            &data,
            &[SmsMessage {
                id: "m1".into(),
                from: "+1555".into(),
                to: "+1556".into(),
                body: "hi".into(),
                timestamp: Utc::now().to_rfc3339(),
                status: "received".into(),
                source: "https://api.twilio.com".into(),
            }],
        )
        .unwrap();

        let path = export_tool_data("sms_panel", ExportFormat::Json, &data)
            .unwrap()
            .unwrap();
        let dump: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(dump["messages"].as_array().unwrap().len(), 1);
        assert_eq!(dump["stats"]["total"], 1);
    }

    #[test]
    fn test_unknown_tool_exports_nothing() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path(), dir.path().join("data"));
        let result = export_tool_data("mystery", ExportFormat::Json, &data).unwrap();
        assert!(result.is_none());
    }
}
