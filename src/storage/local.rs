use super::{ByteSource, ObjectStore, StorageError};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Serves objects from `{root}/{bucket}/{path}` on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, path: &str) -> PathBuf {
        self.root.join(bucket).join(path.trim_start_matches('/'))
    }
}

#[rocket::async_trait]
impl ObjectStore for LocalStore {
    async fn open(&self, bucket: &str, path: &str) -> Result<Box<dyn ByteSource>, StorageError> {
        let file_path = self.object_path(bucket, path);
        log::debug!("opening local object {}", file_path.display());

        match File::open(&file_path).await {
            Ok(file) => Ok(Box::new(LocalObject {
                file,
                buf: vec![0; READ_CHUNK_BYTES],
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

struct LocalObject {
    file: File,
    buf: Vec<u8>,
}

#[rocket::async_trait]
impl ByteSource for LocalObject {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        let n = self.file.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }
}
