//! CSV and JSON serializers for recorded sessions.
//!
//! Both exporters consume an [`ExportSnapshot`] and never touch live session
//! state. An empty snapshot is a user-facing validation error, not a crash.

use crate::protocol::CHANNEL_NAMES;
use crate::session::ExportSnapshot;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Errors from file exports.
#[derive(Debug)]
pub enum ExportError {
    /// Nothing recorded; there is no file to write.
    EmptySnapshot,
    Io { path: PathBuf, message: String },
    Serialize(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::EmptySnapshot => write!(f, "no recorded data to export"),
            ExportError::Io { path, message } => {
                write!(f, "could not write {}: {message}", path.display())
            }
            ExportError::Serialize(message) => write!(f, "serialization failed: {message}"),
        }
    }
}

impl std::error::Error for ExportError {}

/// Default export file name: `<sample-name>_<YYYYmmdd_HHMMSS>.<ext>`.
///
/// An empty sample name falls back to `"sample"`.
pub fn default_file_name(snapshot: &ExportSnapshot, extension: &str) -> String {
    let name = if snapshot.sample_name.trim().is_empty() {
        "sample"
    } else {
        snapshot.sample_name.trim()
    };
    format!(
        "{}_{}.{}",
        name,
        snapshot.taken_at.format("%Y%m%d_%H%M%S"),
        extension
    )
}

/// The fixed CSV header: time column plus channel names in canonical order.
pub fn csv_header() -> String {
    let mut header = String::from("Time(s)");
    for name in CHANNEL_NAMES {
        header.push(',');
        header.push_str(name);
    }
    header
}

/// Render the snapshot as CSV, one row per frame.
pub fn render_csv(snapshot: &ExportSnapshot) -> Result<String, ExportError> {
    if snapshot.is_empty() {
        return Err(ExportError::EmptySnapshot);
    }

    let mut out = csv_header();
    out.push('\n');
    for frame in &snapshot.frames {
        out.push_str(&format!("{}", frame.time_offset()));
        for value in frame.channels.values() {
            out.push(',');
            out.push_str(&format!("{value}"));
        }
        out.push('\n');
    }
    Ok(out)
}

/// Write the snapshot as a CSV file.
pub fn write_csv(snapshot: &ExportSnapshot, path: &Path) -> Result<(), ExportError> {
    let rendered = render_csv(snapshot)?;
    std::fs::write(path, rendered).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[derive(Debug, Serialize)]
struct JsonMetadata {
    sample_name: String,
    sample_type: String,
    export_timestamp: String,
    total_samples: usize,
}

#[derive(Debug, Serialize)]
struct JsonDocument {
    metadata: JsonMetadata,
    data: Vec<Value>,
}

/// Render the snapshot as the JSON export document.
///
/// Channel order inside each `sensors` object follows the canonical order;
/// serde_json's `preserve_order` feature keeps insertion order on output.
pub fn render_json(snapshot: &ExportSnapshot) -> Result<String, ExportError> {
    if snapshot.is_empty() {
        return Err(ExportError::EmptySnapshot);
    }

    let data = snapshot
        .frames
        .iter()
        .map(|frame| {
            let mut sensors = Map::new();
            for (name, value) in CHANNEL_NAMES.iter().zip(frame.channels.values()) {
                sensors.insert((*name).to_string(), Value::from(value));
            }
            let mut point = Map::new();
            point.insert("time".to_string(), Value::from(frame.time_offset()));
            point.insert("sensors".to_string(), Value::Object(sensors));
            Value::Object(point)
        })
        .collect();

    let document = JsonDocument {
        metadata: JsonMetadata {
            sample_name: snapshot.sample_name.clone(),
            sample_type: snapshot.sample_type.clone(),
            export_timestamp: snapshot.taken_at.to_rfc3339(),
            total_samples: snapshot.len(),
        },
        data,
    };

    serde_json::to_string_pretty(&document).map_err(|e| ExportError::Serialize(e.to_string()))
}

/// Write the snapshot as a JSON file.
pub fn write_json(snapshot: &ExportSnapshot, path: &Path) -> Result<(), ExportError> {
    let rendered = render_json(snapshot)?;
    std::fs::write(path, rendered).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
