//! # NDJSON Decoder
//!
//! Reads one newline-terminated JSON object at a time from a buffered reader.
//! Only the current line is held in memory, so the cost of decoding a window
//! does not depend on how many records it contains.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{LogshareError, Result};
use crate::logpull::LogRecord;

const INITIAL_LINE_CAPACITY: usize = 1024;

/// A line buffer that grew past this after an unusually long record is
/// shrunk back before the next read.
const MAX_RETAINED_LINE_CAPACITY: usize = 256 * 1024;

/// Longest accepted line, not counting its newline. Logpull records are a
/// few kilobytes even with every field selected.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Incremental decoder over one response body.
///
/// Each call to [`NdjsonDecoder::next_record`] reads exactly one line. The
/// decoder tracks the record index and byte offset so a failure can say
/// where in the body it happened.
pub struct NdjsonDecoder<R> {
    reader: R,
    line: Vec<u8>,
    /// Bytes consumed from `reader` so far.
    offset: u64,
    /// Index the next record will carry.
    index: u64,
    max_line_bytes: usize,
}

impl<R: AsyncBufRead + Unpin> NdjsonDecoder<R> {
    /// Wraps `reader`, numbering records from zero.
    pub fn new(reader: R) -> Self {
        Self::with_start_index(reader, 0)
    }

    /// Starts record numbering at `index`, so error positions stay global
    /// when one logical stream spans several bodies.
    pub fn with_start_index(reader: R, index: u64) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(INITIAL_LINE_CAPACITY),
            offset: 0,
            index,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Overrides [`DEFAULT_MAX_LINE_BYTES`].
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    /// Decodes the next record, or returns `Ok(None)` at end of body.
    ///
    /// Blank lines, including a trailing newline and `\r\n` endings, are
    /// skipped.
    ///
    /// # Errors
    /// * [`LogshareError::Decode`] when a line is not a JSON object, with its
    ///   record index and the byte offset at which the line starts.
    /// * [`LogshareError::LineTooLong`] when no newline appears within the
    ///   line limit. At most that many bytes are buffered.
    /// * [`LogshareError::Io`] when the body cannot be read.
    pub async fn next_record(&mut self) -> Result<Option<LogRecord>> {
        loop {
            if self.line.capacity() > MAX_RETAINED_LINE_CAPACITY {
                self.line = Vec::with_capacity(INITIAL_LINE_CAPACITY);
            }
            self.line.clear();

            let line_start = self.offset;
            let budget = self.max_line_bytes as u64 + 1;
            let n = (&mut self.reader).take(budget).read_until(b'\n', &mut self.line).await?;
            if n == 0 {
                return Ok(None);
            }
            self.offset += n as u64;

            if n as u64 == budget && self.line.last() != Some(&b'\n') {
                return Err(LogshareError::LineTooLong {
                    index: self.index,
                    offset: line_start,
                    max: self.max_line_bytes,
                });
            }

            let text = self.line.trim_ascii();
            if text.is_empty() {
                continue;
            }

            let index = self.index;
            self.index += 1;
            return match serde_json::from_slice::<LogRecord>(text) {
                Ok(record) => Ok(Some(record)),
                Err(source) => Err(LogshareError::Decode {
                    index,
                    offset: line_start,
                    source,
                }),
            };
        }
    }

    /// Index the next decoded record will carry.
    pub fn next_index(&self) -> u64 {
        self.index
    }

    /// Bytes consumed from the body so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Current capacity of the line buffer, the decoder's only allocation
    /// that scales with input.
    pub fn buffer_capacity(&self) -> usize {
        self.line.capacity()
    }

    /// Returns the reader, positioned just after the last line read.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
