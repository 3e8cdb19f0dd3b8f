//! Object storage access for import sources.
//!
//! The pipeline only ever reads an object front to back, so a source is a
//! pull-based [`ByteSource`] handing out owned chunks until it is drained.
//! Implementations:
//!
//! - [`GcsStore`] streams objects from Google Cloud Storage over HTTP
//! - [`LocalStore`] reads files below a local root (command line imports)
//! - [`GzipStream`] wraps any source and yields the decompressed bytes

pub mod gcs;
pub mod gzip;
pub mod local;

pub use gcs::{GcsConfig, GcsStore};
pub use gzip::GzipStream;
pub use local::LocalStore;

use thiserror::Error;

/// Failures while opening or reading a stored object.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {bucket}/{path} not found")]
    NotFound { bucket: String, path: String },
    #[error("storage returned status {status} for {bucket}/{path}: {body}")]
    Status {
        status: u16,
        bucket: String,
        path: String,
        body: String,
    },
    #[error("storage HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid storage endpoint: {0}")]
    Endpoint(String),
    #[error("failed to obtain storage credentials: {0}")]
    Credentials(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gzip decompression failed: {0}")]
    Decompress(std::io::Error),
}

/// Sequential, forward-only byte stream.
#[rocket::async_trait]
pub trait ByteSource: Send {
    /// Next chunk of bytes, or `None` once the stream is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StorageError>;
}

#[rocket::async_trait]
impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).next_chunk().await
    }
}

/// Opens objects by bucket and path.
#[rocket::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open(&self, bucket: &str, path: &str) -> Result<Box<dyn ByteSource>, StorageError>;
}
