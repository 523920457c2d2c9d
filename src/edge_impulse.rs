//! Edge Impulse ingestion upload.
//!
//! Builds the service's CSV shape (a wall-clock millisecond timestamp column
//! followed by positional channel indices 0-6; channel names are dropped by
//! the external contract) and submits it as a multipart upload. The
//! temporary file is removed on success and on every failure path.

use crate::protocol::CHANNEL_COUNT;
use crate::session::ExportSnapshot;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upload timeout. Generous because the ingestion service re-encodes files.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Edge Impulse ingestion settings. Stored in the agent config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeImpulseConfig {
    /// Ingestion endpoint for training files.
    pub ingestion_url: String,
    /// Project API key, sent as `x-api-key`.
    pub api_key: String,
    /// Project id, sent as `x-project-id`.
    pub project_id: String,
}

impl Default for EdgeImpulseConfig {
    fn default() -> Self {
        Self {
            ingestion_url: "https://ingestion.edgeimpulse.com/api/training/files".to_string(),
            api_key: String::new(),
            project_id: String::new(),
        }
    }
}

impl EdgeImpulseConfig {
    /// Check that the credentials needed for an upload are present.
    pub fn validate(&self) -> Result<(), EdgeImpulseError> {
        if self.api_key.trim().is_empty() {
            return Err(EdgeImpulseError::Config("API key is not set".to_string()));
        }
        if self.project_id.trim().is_empty() {
            return Err(EdgeImpulseError::Config("project id is not set".to_string()));
        }
        Ok(())
    }
}

/// Errors from the Edge Impulse upload path.
#[derive(Debug)]
pub enum EdgeImpulseError {
    /// Missing or invalid credentials.
    Config(String),
    /// Nothing recorded; there is no file to upload.
    EmptySnapshot,
    /// Temp file write/read failure.
    Io(String),
    /// Transport failure (connect, TLS, timeout).
    Network(String),
    /// The service answered with a non-2xx status.
    Server { status: u16, body: String },
}

impl std::fmt::Display for EdgeImpulseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeImpulseError::Config(msg) => write!(f, "Edge Impulse config error: {msg}"),
            EdgeImpulseError::EmptySnapshot => write!(f, "no recorded data to upload"),
            EdgeImpulseError::Io(msg) => write!(f, "Edge Impulse file error: {msg}"),
            EdgeImpulseError::Network(msg) => write!(f, "Edge Impulse network error: {msg}"),
            EdgeImpulseError::Server { status, body } => {
                write!(f, "Edge Impulse upload failed ({status}): {body}")
            }
        }
    }
}

impl std::error::Error for EdgeImpulseError {}

/// Header row of the training CSV: `timestamp,0,1,...,6`.
pub fn training_csv_header() -> String {
    let mut header = String::from("timestamp");
    for index in 0..CHANNEL_COUNT {
        header.push(',');
        header.push_str(&index.to_string());
    }
    header
}

/// Render the training CSV for a snapshot.
///
/// Each row's timestamp is `start_ms + round(time_offset * 1000)`, keeping
/// the channel values in canonical positional order.
pub fn render_training_csv(
    snapshot: &ExportSnapshot,
    start_ms: i64,
) -> Result<String, EdgeImpulseError> {
    if snapshot.is_empty() {
        return Err(EdgeImpulseError::EmptySnapshot);
    }

    let mut out = training_csv_header();
    out.push('\n');
    for frame in &snapshot.frames {
        let timestamp = start_ms + (frame.time_offset() * 1000.0).round() as i64;
        out.push_str(&timestamp.to_string());
        for value in frame.channels.values() {
            out.push(',');
            out.push_str(&format!("{value}"));
        }
        out.push('\n');
    }
    Ok(out)
}

/// Removes the wrapped file when dropped, covering every exit path.
struct TempFile(PathBuf);

impl TempFile {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("could not remove temp file {}: {e}", self.0.display());
            }
        }
    }
}

/// Async client for the ingestion endpoint.
pub struct EdgeImpulseClient {
    config: EdgeImpulseConfig,
    client: reqwest::Client,
}

impl EdgeImpulseClient {
    pub fn new(config: EdgeImpulseConfig) -> Result<Self, EdgeImpulseError> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| EdgeImpulseError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Upload one snapshot as a labeled training file.
    ///
    /// The label is the snapshot's sample type. The temp CSV lives in the
    /// system temp dir for the duration of the request only.
    pub async fn upload(&self, snapshot: &ExportSnapshot) -> Result<(), EdgeImpulseError> {
        self.config.validate()?;
        if snapshot.is_empty() {
            return Err(EdgeImpulseError::EmptySnapshot);
        }

        let sample_name = if snapshot.sample_name.trim().is_empty() {
            "sample"
        } else {
            snapshot.sample_name.trim()
        };
        let file_name = format!(
            "edge_impulse_{}_{}.csv",
            sample_name,
            snapshot.taken_at.format("%Y%m%d_%H%M%S")
        );

        let start_ms = Utc::now().timestamp_millis();
        let rendered = render_training_csv(snapshot, start_ms)?;

        let temp = TempFile(std::env::temp_dir().join(&file_name));
        std::fs::write(temp.path(), &rendered).map_err(|e| EdgeImpulseError::Io(e.to_string()))?;

        let bytes = std::fs::read(temp.path()).map_err(|e| EdgeImpulseError::Io(e.to_string()))?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("text/csv")
            .map_err(|e| EdgeImpulseError::Io(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("data", part);

        let response = self
            .client
            .post(&self.config.ingestion_url)
            .header("x-api-key", &self.config.api_key)
            .header("x-file-name", &file_name)
            .header("x-label", &snapshot.sample_type)
            .header("x-project-id", &self.config.project_id)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EdgeImpulseError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EdgeImpulseError::Server {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("uploaded {} samples to Edge Impulse", snapshot.len());
        Ok(())
    }
}

/// Blocking upload client for use off the interactive thread.
pub struct BlockingEdgeImpulseClient {
    inner: EdgeImpulseClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingEdgeImpulseClient {
    pub fn new(config: EdgeImpulseConfig) -> Result<Self, EdgeImpulseError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EdgeImpulseError::Config(format!("failed to create runtime: {e}")))?;

        Ok(Self {
            inner: EdgeImpulseClient::new(config)?,
            runtime,
        })
    }

    /// Upload one snapshot as a labeled training file.
    pub fn upload(&self, snapshot: &ExportSnapshot) -> Result<(), EdgeImpulseError> {
        self.runtime.block_on(self.inner.upload(snapshot))
    }
}
