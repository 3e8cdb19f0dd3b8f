use super::{Batch, ImportError};
use crate::db::{CopyCommand, LoadSession, TableRef};

/// Encoding options for COPY data.
#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    pub empty_as_null: bool,
    /// Frames are cut at row boundaries once they reach this size.
    pub frame_bytes: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            empty_as_null: true,
            frame_bytes: 1 << 20,
        }
    }
}

/// Streams batches into one table with `COPY ... FROM STDIN`, one COPY per
/// batch, strictly in the order they are handed in.
pub struct BulkLoader {
    copy: CopyCommand,
    options: CopyOptions,
    batches_loaded: usize,
    rows_loaded: u64,
}

impl BulkLoader {
    pub fn new(table: &TableRef, columns: &[String], options: CopyOptions) -> Self {
        Self {
            copy: CopyCommand::new(table, columns),
            options,
            batches_loaded: 0,
            rows_loaded: 0,
        }
    }

    pub fn copy_command(&self) -> &CopyCommand {
        &self.copy
    }

    pub fn batches_loaded(&self) -> usize {
        self.batches_loaded
    }

    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }

    /// Load one batch, consuming it. Returns the rows the server accepted.
    pub async fn load(
        &mut self,
        session: &mut dyn LoadSession,
        batch: Batch,
    ) -> Result<u64, ImportError> {
        let number = batch.number;
        let row_count = batch.rows.len();
        let frames = encode_batch(&batch, &self.options);
        drop(batch);

        let copied = session.copy_in(&self.copy, frames).await.map_err(|e| {
            ImportError::Load(format!(
                "batch {number} ({row_count} rows) rejected by {}: {e}",
                self.copy.table
            ))
        })?;

        self.batches_loaded += 1;
        self.rows_loaded += copied;
        Ok(copied)
    }
}

/// Encode a batch as COPY text format, split into frames.
pub fn encode_batch(batch: &Batch, options: &CopyOptions) -> Vec<Vec<u8>> {
    let frame_bytes = options.frame_bytes.max(1);
    let mut frames = Vec::new();
    let mut frame = Vec::with_capacity(frame_bytes.min(64 * 1024));

    for row in &batch.rows {
        for (index, field) in row.iter().enumerate() {
            if index > 0 {
                frame.push(b'\t');
            }
            push_field(&mut frame, field, options.empty_as_null);
        }
        frame.push(b'\n');

        if frame.len() >= frame_bytes {
            frames.push(std::mem::take(&mut frame));
        }
    }

    if !frame.is_empty() {
        frames.push(frame);
    }

    frames
}

fn push_field(buf: &mut Vec<u8>, field: &str, empty_as_null: bool) {
    if field.is_empty() && empty_as_null {
        buf.extend_from_slice(b"\\N");
        return;
    }

    for &byte in field.as_bytes() {
        match byte {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            other => buf.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectTarget, Destination};
    use crate::pipeline::Row;
    use crate::test_support::{MemoryDestination, test_credentials};

    fn batch(number: usize, rows: &[&[&str]]) -> Batch {
        Batch {
            number,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|f| f.to_string()).collect::<Row>())
                .collect(),
        }
    }

    #[test]
    fn escapes_copy_specials() {
        let frames = encode_batch(
            &batch(1, &[&["a\tb", "line\nbreak", "back\\slash", "cr\r"]]),
            &CopyOptions::default(),
        );

        assert_eq!(frames, vec![b"a\\tb\tline\\nbreak\tback\\\\slash\tcr\\r\n".to_vec()]);
    }

    #[test]
    fn empty_fields_follow_null_option() {
        let rows = batch(1, &[&["", "x"]]);

        let as_null = encode_batch(&rows, &CopyOptions::default());
        assert_eq!(as_null, vec![b"\\N\tx\n".to_vec()]);

        let as_empty = encode_batch(
            &rows,
            &CopyOptions {
                empty_as_null: false,
                ..CopyOptions::default()
            },
        );
        assert_eq!(as_empty, vec![b"\tx\n".to_vec()]);
    }

    #[test]
    fn frames_split_on_row_boundaries() {
        let rows = batch(1, &[&["aaaa"], &["bbbb"], &["cccc"]]);
        let frames = encode_batch(
            &rows,
            &CopyOptions {
                empty_as_null: true,
                frame_bytes: 8,
            },
        );

        assert_eq!(
            frames,
            vec![b"aaaa\nbbbb\n".to_vec(), b"cccc\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn loads_batches_in_order() {
        let destination = MemoryDestination::new();
        let table = TableRef::new("public", "t");
        destination.create_table(table.clone(), &["a", "b"]);
        let mut session = destination
            .connect(&ConnectTarget::Socket("/tmp".into()), &test_credentials())
            .await
            .expect("memory connect");

        let columns = vec!["a".to_string(), "b".to_string()];
        let mut loader = BulkLoader::new(&table, &columns, CopyOptions::default());

        loader
            .load(session.as_mut(), batch(1, &[&["1", "2"], &["3", "4"]]))
            .await
            .expect("first batch");
        loader
            .load(session.as_mut(), batch(2, &[&["5", ""]]))
            .await
            .expect("second batch");

        assert_eq!(loader.batches_loaded(), 2);
        assert_eq!(loader.rows_loaded(), 3);
        assert_eq!(
            destination.rows(&table),
            vec![
                vec![Some("1".to_string()), Some("2".to_string())],
                vec![Some("3".to_string()), Some("4".to_string())],
                vec![Some("5".to_string()), None],
            ]
        );
    }

    #[tokio::test]
    async fn rejected_batch_is_a_load_error() {
        let destination = MemoryDestination::new();
        let table = TableRef::new("public", "t");
        destination.create_table(table.clone(), &["a", "b"]);
        let mut session = destination
            .connect(&ConnectTarget::Socket("/tmp".into()), &test_credentials())
            .await
            .expect("memory connect");

        let columns = vec!["a".to_string(), "b".to_string()];
        let mut loader = BulkLoader::new(&table, &columns, CopyOptions::default());

        let err = loader
            .load(session.as_mut(), batch(7, &[&["1", "2", "3"]]))
            .await
            .unwrap_err();

        match err {
            ImportError::Load(message) => {
                assert!(message.starts_with("batch 7 (1 rows) rejected by public.t"), "{message}")
            }
            other => panic!("expected load error, got {other:?}"),
        }
        assert_eq!(loader.batches_loaded(), 0);
        assert!(destination.rows(&table).is_empty());
    }
}
