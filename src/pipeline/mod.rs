//! Streaming import pipeline.
//!
//! Each stage owns the stage before it and exposes an async `next_*`
//! method, so one import is a single pull-driven flow:
//!
//! 1. **Object stream** ([`crate::storage`]) - compressed bytes, then
//!    [`GzipStream`](crate::storage::GzipStream) for plain text
//! 2. **Row decoding** (`decoder`) - delimited text into [`Row`]s
//! 3. **Chunking** (`chunker`) - rows into bounded [`Batch`]es
//! 4. **Bulk loading** (`loader`) - one `COPY ... FROM STDIN` per batch
//!
//! `validator` checks the destination before any bytes are read, and
//! `orchestrator` drives the whole run and owns the connection.

pub mod chunker;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod plan;
pub mod validator;

pub use chunker::Chunker;
pub use decoder::{DecoderOptions, RowDecoder};
pub use error::{ImportError, ImportFailure, ImportState};
pub use loader::{BulkLoader, CopyOptions};
pub use orchestrator::{ImportService, format_elapsed};
pub use plan::ImportPlan;
pub use validator::validate_table;

/// One decoded record.
pub type Row = Vec<String>;

/// Consecutive rows sent in one COPY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position in the import.
    pub number: usize,
    pub rows: Vec<Row>,
}

/// Lazy, finite, forward-only sequence of rows.
#[rocket::async_trait]
pub trait RowSource: Send {
    async fn next_row(&mut self) -> Result<Option<Row>, ImportError>;
}
