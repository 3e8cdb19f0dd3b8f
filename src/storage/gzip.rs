use super::{ByteSource, StorageError};
use flate2::write::MultiGzDecoder;
use std::io::{self, Write};

/// Decompresses a gzip byte stream as it is pulled.
///
/// Compressed chunks are pushed through a write-side decoder whose output
/// buffer is drained after every chunk, so at most one decompressed chunk
/// is held at a time. Concatenated gzip members are decoded in sequence.
pub struct GzipStream<S> {
    inner: S,
    decoder: MultiGzDecoder<Vec<u8>>,
    compressed_bytes: u64,
    finished: bool,
}

impl<S: ByteSource> GzipStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: MultiGzDecoder::new(Vec::new()),
            compressed_bytes: 0,
            finished: false,
        }
    }

    /// Compressed bytes consumed so far.
    pub fn compressed_bytes(&self) -> u64 {
        self.compressed_bytes
    }
}

#[rocket::async_trait]
impl<S: ByteSource> ByteSource for GzipStream<S> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        while !self.finished {
            match self.inner.next_chunk().await? {
                Some(compressed) => {
                    self.compressed_bytes += compressed.len() as u64;
                    self.decoder
                        .write_all(&compressed)
                        .map_err(StorageError::Decompress)?;
                }
                None => {
                    self.finished = true;
                    if self.compressed_bytes == 0 {
                        return Err(StorageError::Decompress(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "object is empty",
                        )));
                    }
                    self.decoder.try_finish().map_err(StorageError::Decompress)?;
                }
            }

            let decompressed = std::mem::take(self.decoder.get_mut());
            if !decompressed.is_empty() {
                return Ok(Some(decompressed));
            }
        }

        Ok(None)
    }
}
