use super::{ImportError, Row, RowSource};
use crate::storage::ByteSource;
use csv_core::{ReadRecordResult, Reader, ReaderBuilder};

const INITIAL_OUTPUT_BYTES: usize = 4 * 1024;
const INITIAL_FIELDS: usize = 32;

/// Where the bytes consumed so far leave the current field.
///
/// csv-core is lenient and never reports an unclosed quote, so the decoder
/// follows the same transitions to notice input ending inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Start,
    Unquoted,
    Quoted,
    /// A quote inside a quoted field: closes it unless another follows.
    QuoteInQuoted,
}

impl FieldState {
    fn advance(self, byte: u8, delimiter: u8, quote: u8) -> Self {
        let boundary = byte == delimiter || byte == b'\n' || byte == b'\r';
        match self {
            FieldState::Start if byte == quote => FieldState::Quoted,
            FieldState::Start | FieldState::Unquoted if boundary => FieldState::Start,
            FieldState::Start | FieldState::Unquoted => FieldState::Unquoted,
            FieldState::Quoted if byte == quote => FieldState::QuoteInQuoted,
            FieldState::Quoted => FieldState::Quoted,
            FieldState::QuoteInQuoted if byte == quote => FieldState::Quoted,
            FieldState::QuoteInQuoted if boundary => FieldState::Start,
            FieldState::QuoteInQuoted => FieldState::Unquoted,
        }
    }
}

/// Decoder settings.
#[derive(Debug, Clone, Copy)]
pub struct DecoderOptions {
    pub delimiter: u8,
    pub skip_header: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_header: false,
        }
    }
}

/// Incremental delimited-text parser over a [`ByteSource`].
///
/// Records follow RFC 4180 quoting: a quoted field may contain the
/// delimiter, doubled quotes and line breaks. Lines end in `\n` or `\r\n`
/// and blank lines are skipped. Input is pulled one chunk at a time, so a
/// record may straddle any number of chunks.
pub struct RowDecoder<S> {
    source: S,
    reader: Reader,
    quote: u8,
    delimiter: u8,
    skip_header: bool,
    input: Vec<u8>,
    input_pos: usize,
    eof: bool,
    done: bool,
    output: Vec<u8>,
    output_len: usize,
    ends: Vec<usize>,
    ends_len: usize,
    field_state: FieldState,
    records: u64,
}

impl<S: ByteSource> RowDecoder<S> {
    pub fn new(source: S, options: DecoderOptions) -> Self {
        let quote = b'"';
        let reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .quote(quote)
            .double_quote(true)
            .build();

        Self {
            source,
            reader,
            quote,
            delimiter: options.delimiter,
            skip_header: options.skip_header,
            input: Vec::new(),
            input_pos: 0,
            eof: false,
            done: false,
            output: vec![0; INITIAL_OUTPUT_BYTES],
            output_len: 0,
            ends: vec![0; INITIAL_FIELDS],
            ends_len: 0,
            field_state: FieldState::Start,
            records: 0,
        }
    }

    /// Records decoded so far, header included.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Next row, or `None` at end of input.
    pub async fn next_row(&mut self) -> Result<Option<Row>, ImportError> {
        while let Some(row) = self.read_record().await? {
            if self.skip_header {
                self.skip_header = false;
                continue;
            }
            return Ok(Some(row));
        }
        Ok(None)
    }

    async fn read_record(&mut self) -> Result<Option<Row>, ImportError> {
        if self.done {
            return Ok(None);
        }

        loop {
            // csv-core treats an empty input slice as end of data, so only
            // hand it one once the source is drained.
            while self.input_pos == self.input.len() && !self.eof {
                match self.source.next_chunk().await? {
                    Some(chunk) => {
                        self.input = chunk;
                        self.input_pos = 0;
                    }
                    None => self.eof = true,
                }
            }

            let input = &self.input[self.input_pos..];
            let (result, nin, nout, nend) = self.reader.read_record(
                input,
                &mut self.output[self.output_len..],
                &mut self.ends[self.ends_len..],
            );

            let (delimiter, quote) = (self.delimiter, self.quote);
            self.field_state = input[..nin]
                .iter()
                .fold(self.field_state, |state, &byte| state.advance(byte, delimiter, quote));
            self.input_pos += nin;
            self.output_len += nout;
            self.ends_len += nend;

            match result {
                ReadRecordResult::InputEmpty => {}
                ReadRecordResult::OutputFull => {
                    let len = self.output.len();
                    self.output.resize(len * 2, 0);
                }
                ReadRecordResult::OutputEndsFull => {
                    let len = self.ends.len();
                    self.ends.resize(len * 2, 0);
                }
                ReadRecordResult::Record => {
                    self.records += 1;
                    let at_end_of_input = self.eof && self.input_pos == self.input.len();
                    if at_end_of_input && self.field_state == FieldState::Quoted {
                        self.done = true;
                        return Err(ImportError::Parse(format!(
                            "record {}: unterminated quoted field at end of input",
                            self.records
                        )));
                    }
                    let row = self.take_row()?;
                    return Ok(Some(row));
                }
                ReadRecordResult::End => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }

    fn take_row(&mut self) -> Result<Row, ImportError> {
        let mut row = Vec::with_capacity(self.ends_len);
        let mut start = 0;

        for (index, &end) in self.ends[..self.ends_len].iter().enumerate() {
            let field = std::str::from_utf8(&self.output[start..end]).map_err(|_| {
                ImportError::Parse(format!(
                    "record {}: field {} is not valid UTF-8",
                    self.records,
                    index + 1
                ))
            })?;
            row.push(field.to_string());
            start = end;
        }

        self.output_len = 0;
        self.ends_len = 0;
        Ok(row)
    }
}

#[rocket::async_trait]
impl<S: ByteSource> RowSource for RowDecoder<S> {
    async fn next_row(&mut self) -> Result<Option<Row>, ImportError> {
        RowDecoder::next_row(self).await
    }
}
