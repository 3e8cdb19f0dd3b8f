use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_schema() -> String {
    "public".to_string()
}

fn default_chunk_size() -> i64 {
    1_000_000
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

// ===== Import =====

/// Payload of `POST /import_async`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub table_name: String,
    #[serde(default = "default_schema")]
    pub table_schema: String,
    pub bucket_name: String,
    pub file_path: String,
    pub instance_connection_name: String,
    /// Rows per COPY batch; signed so that negative input reaches the
    /// configuration check instead of failing deserialization.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default)]
    pub skip_header: bool,
    /// Destination columns in file field order.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Load empty fields as NULL rather than empty strings.
    #[serde(default = "default_true")]
    pub empty_as_null: bool,
    /// Wrap the whole load in one transaction.
    #[serde(default = "default_true")]
    pub transactional: bool,
}

impl ImportRequest {
    /// Request with every optional field at its default.
    pub fn new(
        table_name: impl Into<String>,
        bucket_name: impl Into<String>,
        file_path: impl Into<String>,
        instance_connection_name: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            table_schema: default_schema(),
            bucket_name: bucket_name.into(),
            file_path: file_path.into(),
            instance_connection_name: instance_connection_name.into(),
            chunk_size: default_chunk_size(),
            skip_header: false,
            columns,
            delimiter: default_delimiter(),
            empty_as_null: true,
            transactional: true,
        }
    }

    /// `bucket/path`, as reported back to the caller.
    pub fn gcs_uri(&self) -> String {
        format!("{}/{}", self.bucket_name, self.file_path)
    }

    pub fn schema_table(&self) -> String {
        format!("{}.{}", self.table_schema, self.table_name)
    }
}

/// Outcome of a completed import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    pub import_id: Uuid,
    pub gcs_uri: String,
    pub schema_table: String,
    pub started_at: DateTime<Utc>,
    /// Elapsed wall time as `H:MM:SS.ffffff`.
    pub time_taken: String,
    pub elapsed_ms: u64,
    pub rows_loaded: u64,
    pub batches: usize,
}

// ===== Pub/Sub push =====

/// Message inside a Pub/Sub push delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubMessage {
    /// Base64 encoded JSON [`ImportRequest`].
    pub data: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
}

/// Envelope posted by a Pub/Sub push subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubRequest {
    pub message: PubSubMessage,
    pub subscription: String,
}
