use super::{Batch, ImportError, RowSource};

/// Groups rows into batches of at most `chunk_size`, preserving order.
///
/// Only the batch being filled is held in memory.
pub struct Chunker<R> {
    rows: R,
    chunk_size: usize,
    batches: usize,
    exhausted: bool,
}

impl<R: RowSource> Chunker<R> {
    pub fn new(rows: R, chunk_size: usize) -> Result<Self, ImportError> {
        if chunk_size == 0 {
            return Err(ImportError::Configuration(
                "chunk_size must be a positive integer, got 0".to_string(),
            ));
        }

        Ok(Self {
            rows,
            chunk_size,
            batches: 0,
            exhausted: false,
        })
    }

    /// Batches handed out so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Next batch, or `None` once the rows run out. Never yields an empty
    /// batch.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, ImportError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(self.chunk_size.min(1024));
        while rows.len() < self.chunk_size {
            match self.rows.next_row().await? {
                Some(row) => rows.push(row),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }

        self.batches += 1;
        Ok(Some(Batch {
            number: self.batches,
            rows,
        }))
    }
}
