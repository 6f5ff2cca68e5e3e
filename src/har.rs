//! Flatten a browser network capture (HAR) into one CSV row per entry.

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Written for any field absent from an entry.
pub const MISSING: &str = "N/A";

pub const COLUMNS: [&str; 7] = [
    "Request URL",
    "Started DateTime",
    "Protocol",
    "Status Code",
    "Content Size",
    "MIME Type",
    "Transfer Size",
];

#[derive(Error, Debug)]
pub enum HarError {
    #[error("File '{}' not found.", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid HAR document: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, HarError>;

#[derive(Deserialize, Default)]
struct Har {
    #[serde(default)]
    log: HarLog,
}

#[derive(Deserialize, Default)]
struct HarLog {
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(rename = "startedDateTime")]
    started_date_time: Option<JsonValue>,
    #[serde(default)]
    request: Request,
    #[serde(default)]
    response: Response,
}

#[derive(Deserialize, Default)]
struct Request {
    url: Option<JsonValue>,
    #[serde(rename = "httpVersion")]
    http_version: Option<JsonValue>,
}

#[derive(Deserialize, Default)]
struct Response {
    status: Option<JsonValue>,
    #[serde(rename = "_transferSize")]
    transfer_size: Option<JsonValue>,
    #[serde(default)]
    content: Content,
}

#[derive(Deserialize, Default)]
struct Content {
    size: Option<JsonValue>,
    #[serde(rename = "mimeType")]
    mime_type: Option<JsonValue>,
}

/// One flattened HAR entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarRow {
    #[serde(rename = "Request URL")]
    pub request_url: String,
    #[serde(rename = "Started DateTime")]
    pub started_date_time: String,
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "Status Code")]
    pub status_code: String,
    #[serde(rename = "Content Size")]
    pub content_size: String,
    #[serde(rename = "MIME Type")]
    pub mime_type: String,
    #[serde(rename = "Transfer Size")]
    pub transfer_size: String,
}

fn cell(value: Option<JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => MISSING.to_string(),
        Some(JsonValue::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

impl From<Entry> for HarRow {
    fn from(entry: Entry) -> Self {
        HarRow {
            request_url: cell(entry.request.url),
            started_date_time: cell(entry.started_date_time),
            protocol: cell(entry.request.http_version),
            status_code: cell(entry.response.status),
            content_size: cell(entry.response.content.size),
            mime_type: cell(entry.response.content.mime_type),
            transfer_size: cell(entry.response.transfer_size),
        }
    }
}

/// Flatten a HAR document, keeping entry order.
pub fn parse_har(json: &str) -> Result<Vec<HarRow>> {
    let har: Har = serde_json::from_str(json)?;
    Ok(har.log.entries.into_iter().map(HarRow::from).collect())
}

pub fn read_har(path: &Path) -> Result<Vec<HarRow>> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HarError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    parse_har(&json)
}

/// Write rows to `path`, replacing any previous table.
pub fn write_csv(rows: &[HarRow], path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Convert `input` into a CSV table at `output`, returning the rows written.
pub fn convert_file(input: &Path, output: &Path) -> Result<Vec<HarRow>> {
    let rows = read_har(input)?;
    write_csv(&rows, output)?;
    info!("Converted {} HAR entries from {} to {}", rows.len(), input.display(), output.display());
    Ok(rows)
}

/// Console preview of the first `limit` rows.
pub fn preview(rows: &[HarRow], limit: usize) -> String {
    let mut out = COLUMNS.join(" | ");
    for row in rows.iter().take(limit) {
        out.push('\n');
        out.push_str(
            &[
                row.request_url.as_str(),
                row.started_date_time.as_str(),
                row.protocol.as_str(),
                row.status_code.as_str(),
                row.content_size.as_str(),
                row.mime_type.as_str(),
                row.transfer_size.as_str(),
            ]
            .join(" | "),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_entry_fields() {
        let rows = parse_har(
            r#"{"log": {"entries": [{
                "startedDateTime": "2025-02-01T10:00:00.000Z",
                "request": {"url": "https://example.com/a.js", "httpVersion": "h2"},
                "response": {"status": 200, "_transferSize": 1234,
                             "content": {"size": 4096, "mimeType": "text/javascript"}}
            }]}}"#,
        )
        .unwrap();

        assert_eq!(
            rows,
            vec![HarRow {
                request_url: "https://example.com/a.js".into(),
                started_date_time: "2025-02-01T10:00:00.000Z".into(),
                protocol: "h2".into(),
                status_code: "200".into(),
                content_size: "4096".into(),
                mime_type: "text/javascript".into(),
                transfer_size: "1234".into(),
            }]
        );
    }

    #[test]
    fn absent_and_null_fields_become_missing_marker() {
        let rows = parse_har(
            r#"{"log": {"entries": [
                {"request": {"url": "https://example.com/"}, "response": {"status": null}},
                {}
            ]}}"#,
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].request_url, "https://example.com/");
        assert_eq!(rows[0].status_code, MISSING);
        assert_eq!(rows[0].transfer_size, MISSING);
        assert!(rows[1].request_url == MISSING && rows[1].mime_type == MISSING);
    }

    #[test]
    fn document_without_entries_yields_no_rows() {
        assert!(parse_har("{}").unwrap().is_empty());
        assert!(parse_har(r#"{"log": {}}"#).unwrap().is_empty());
    }

    #[test]
    fn file_and_string_inputs_agree() {
        let json = r#"{"log": {"entries": [
            {"request": {"url": "https://example.com/"}, "response": {"status": 304}},
            {"request": {"url": "https://example.com/b"}}
        ]}}"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.har");
        fs::write(&path, json).unwrap();

        assert_eq!(read_har(&path).unwrap(), parse_har(json).unwrap());

        fs::write(&path, "not json").unwrap();
        assert!(matches!(read_har(&path).unwrap_err(), HarError::JsonError(_)));
    }

    #[test]
    fn missing_input_is_reported() {
        let err = read_har(Path::new("/nonexistent/capture.har")).unwrap_err();
        assert!(matches!(err, HarError::FileNotFound(_)));
        assert_eq!(err.to_string(), "File '/nonexistent/capture.har' not found.");
    }
}
