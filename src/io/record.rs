//! Byte stream <-> record translation on top of [`AsyncFile`].
//!
//! This module provides:
//! - **Framing** with [`RecordFormat`]: record separator (required), field
//!   separator and field quote (optional).
//! - **Incremental scanning** with [`RecordScanner`]: a two-state machine
//!   (normal / inside a quoted field) that finds record boundaries across
//!   arbitrary chunk boundaries, carrying the unterminated tail over to the next
//!   chunk.
//! - **Field splitting** with [`split_fields`] and the inverse [`join_fields`].
//! - **Streaming reader/writer**: [`RecordReader`] and [`RecordWriter`].
//! - **Separator sniffing**: [`sniff_record_separator`].
//!
//! # Quoting
//! A quoted field starts with the quote right at the field start and ends at the
//! first *quote + field separator* (or *quote + record separator*) sequence, so a
//! quote character in the middle of quoted content needs no escaping. The
//! writer quotes every field when a quote is configured and refuses content that
//! would make the boundary ambiguous.

use crate::config::IoConfig;
use crate::error::FlatError;
use crate::io::engine::{Access, AsyncFile, ReadChunk, ReadSink};
use anyhow::{Context, Result};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Separator candidates tried by [`sniff_record_separator`], in order.
pub const SNIFF_CANDIDATES: [&[u8]; 3] = [b"\r\n", b"\r", b"\n"];

/// Physical framing of a record file.
#[derive(Clone, PartialEq, Eq)]
pub struct RecordFormat {
    record_separator: Vec<u8>,
    field_separator: Option<Vec<u8>>,
    field_quote: Option<Vec<u8>>,
}

impl RecordFormat {
    /// # Errors
    /// The record separator must be non-empty, an empty field separator or quote
    /// is rejected, and a quote requires a field separator.
    pub fn new(
        record_separator: impl Into<Vec<u8>>,
        field_separator: Option<Vec<u8>>,
        field_quote: Option<Vec<u8>>,
    ) -> Result<Self> {
        let record_separator = record_separator.into();
        if record_separator.is_empty() {
            crate::flat_bail!(schema, "record format", "record separator must not be empty");
        }
        if field_separator.as_ref().is_some_and(Vec::is_empty) {
            crate::flat_bail!(schema, "record format", "field separator must not be empty");
        }
        if field_quote.as_ref().is_some_and(Vec::is_empty) {
            crate::flat_bail!(schema, "record format", "field quote must not be empty");
        }
        if field_quote.is_some() && field_separator.is_none() {
            crate::flat_bail!(schema, "record format", "a field quote requires a field separator");
        }
        Ok(Self {
            record_separator,
            field_separator,
            field_quote,
        })
    }

    /// Records separated by `record_separator`, no fields.
    pub fn lines(record_separator: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(record_separator, None, None)
    }

    pub fn record_separator(&self) -> &[u8] {
        &self.record_separator
    }

    pub fn field_separator(&self) -> Option<&[u8]> {
        self.field_separator.as_deref()
    }

    pub fn field_quote(&self) -> Option<&[u8]> {
        self.field_quote.as_deref()
    }
}

impl fmt::Debug for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |b: Option<&[u8]>| b.map(|b| String::from_utf8_lossy(b).escape_debug().to_string());
        f.debug_struct("RecordFormat")
            .field("record_separator", &show(Some(&self.record_separator)))
            .field("field_separator", &show(self.field_separator()))
            .field("field_quote", &show(self.field_quote()))
            .finish()
    }
}

fn find(hay: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > hay.len() || hay.len() - from < needle.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    find(hay, 0, needle).is_some()
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(a.len() + b.len());
    v.extend_from_slice(a);
    v.extend_from_slice(b);
    v
}

/// `tail` is shorter than `sep` and could still grow into it.
fn partial_prefix(tail: &[u8], sep: &[u8]) -> bool {
    tail.len() < sep.len() && sep.starts_with(tail)
}

/// Incremental record boundary detection.
///
/// ```
/// use flatbridge::io::record::{RecordFormat, RecordScanner};
///
/// let fmt = RecordFormat::new(b"\n".to_vec(), Some(b";".to_vec()), Some(b"\"".to_vec()))?;
/// let mut scanner = RecordScanner::new(fmt);
/// assert_eq!(scanner.feed(b"a;\"x\ny\";b\nc;"), vec![b"a;\"x\ny\";b".to_vec()]);
/// assert_eq!(scanner.feed(b"d"), Vec::<Vec<u8>>::new());
/// assert_eq!(scanner.finish()?, Some(b"c;d".to_vec()));
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct RecordScanner {
    format: RecordFormat,
    fragment: Vec<u8>,
}

impl RecordScanner {
    pub fn new(format: RecordFormat) -> Self {
        Self {
            format,
            fragment: Vec::new(),
        }
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    /// Bytes carried over from previous chunks, not yet terminated.
    pub fn pending(&self) -> &[u8] {
        &self.fragment
    }

    pub fn reset(&mut self) {
        self.fragment.clear();
    }

    /// Append `data` to the carried-over fragment and return every record it
    /// completes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.fragment.extend_from_slice(data);
        let (records, consumed, _) = self.scan(&self.fragment, false);
        self.fragment.drain(..consumed);
        records
    }

    /// End of input: the unterminated tail, if any, is the last record.
    ///
    /// # Errors
    /// A tail still inside a quoted field is a codec error; the tail is
    /// discarded.
    pub fn finish(&mut self) -> Result<Option<Vec<u8>>> {
        if self.fragment.is_empty() {
            return Ok(None);
        }
        let (_, _, open_quote) = self.scan(&self.fragment, true);
        let tail = std::mem::take(&mut self.fragment);
        if open_quote {
            let preview: String = String::from_utf8_lossy(&tail).chars().take(40).collect();
            crate::flat_bail!(
                codec,
                "record codec",
                "unterminated quoted field at end of input ({} bytes pending, starting {:?})",
                tail.len(),
                preview
            );
        }
        Ok(Some(tail))
    }

    /// Returns the completed records, the bytes they consumed, and whether the
    /// scan stopped inside a quoted field. At end of input a quote that might
    /// still have been followed by a separator is settled.
    fn scan(&self, buf: &[u8], at_eof: bool) -> (Vec<Vec<u8>>, usize, bool) {
        let rs = self.format.record_separator();
        let fs = self.format.field_separator();
        let quote = self.format.field_quote();

        let mut records = Vec::new();
        let mut start = 0;
        let mut i = 0;
        let mut in_quote = false;
        let mut field_start = true;

        while i < buf.len() {
            let rest = &buf[i..];
            if in_quote {
                // quote is Some whenever in_quote is set
                let q = quote.unwrap_or_default();
                if !q.is_empty() && rest.starts_with(q) {
                    let after = &rest[q.len()..];
                    let closes_field = fs.is_some_and(|fs| after.starts_with(fs));
                    if closes_field || after.starts_with(rs) {
                        in_quote = false;
                        i += q.len();
                        continue;
                    }
                    if at_eof && after.is_empty() {
                        in_quote = false;
                        i += q.len();
                        continue;
                    }
                    let undecided = after.is_empty()
                        || partial_prefix(after, rs)
                        || fs.is_some_and(|fs| partial_prefix(after, fs));
                    if undecided && !at_eof {
                        break;
                    }
                    i += q.len();
                    continue;
                }
                i += 1;
                continue;
            }

            if field_start
                && let Some(q) = quote
                && rest.starts_with(q)
            {
                in_quote = true;
                field_start = false;
                i += q.len();
                continue;
            }
            field_start = false;

            if rest.starts_with(rs) {
                records.push(buf[start..i].to_vec());
                i += rs.len();
                start = i;
                field_start = true;
                continue;
            }
            if let Some(fs) = fs
                && rest.starts_with(fs)
            {
                i += fs.len();
                field_start = true;
                continue;
            }
            i += 1;
        }
        (records, start, in_quote)
    }
}

/// Split one record into its fields.
///
/// Without a field separator the whole record is a single field. Quoted and
/// unquoted fields may be mixed freely.
///
/// # Errors
/// A quoted field that is never closed is a codec error.
pub fn split_fields(format: &RecordFormat, record: &[u8]) -> Result<Vec<Vec<u8>>> {
    let Some(fs) = format.field_separator() else {
        return Ok(vec![record.to_vec()]);
    };
    let closing = format.field_quote().map(|q| concat(q, fs));

    let mut fields = Vec::new();
    let mut pos = 0;
    loop {
        if let (Some(q), Some(closing)) = (format.field_quote(), closing.as_deref())
            && record[pos..].starts_with(q)
        {
            let content = pos + q.len();
            if let Some(end) = find(record, content, closing) {
                fields.push(record[content..end].to_vec());
                pos = end + closing.len();
                continue;
            }
            if record.len() >= content + q.len() && record.ends_with(q) {
                fields.push(record[content..record.len() - q.len()].to_vec());
                return Ok(fields);
            }
            crate::flat_bail!(
                codec,
                "record codec",
                "unterminated quoted field {} starting at byte {}",
                fields.len() + 1,
                pos
            );
        }
        match find(record, pos, fs) {
            Some(end) => {
                fields.push(record[pos..end].to_vec());
                pos = end + fs.len();
            }
            None => {
                fields.push(record[pos..].to_vec());
                return Ok(fields);
            }
        }
    }
}

/// Serialize fields into one record, record separator included.
///
/// # Errors
/// Without a quote, a field containing the field or record separator is a codec
/// error; with a quote, a field containing *quote + separator* is.
pub fn join_fields(format: &RecordFormat, fields: &[Vec<u8>]) -> Result<Vec<u8>> {
    let rs = format.record_separator();
    let mut out = Vec::with_capacity(fields.iter().map(Vec::len).sum::<usize>() + 8);
    let Some(fs) = format.field_separator() else {
        if fields.len() > 1 {
            crate::flat_bail!(codec, "record codec", "{} fields given but no field separator is configured", fields.len());
        }
        let field = fields.first().map(Vec::as_slice).unwrap_or_default();
        return raw_record(format, field);
    };

    for (k, field) in fields.iter().enumerate() {
        if k > 0 {
            out.extend_from_slice(fs);
        }
        match format.field_quote() {
            Some(q) => {
                if contains(field, &concat(q, fs)) || contains(field, &concat(q, rs)) {
                    crate::flat_bail!(
                        codec,
                        "record codec",
                        "field {} contains a closing quote sequence: {:?}",
                        k + 1,
                        String::from_utf8_lossy(field)
                    );
                }
                out.extend_from_slice(q);
                out.extend_from_slice(field);
                out.extend_from_slice(q);
            }
            None => {
                if contains(field, fs) || contains(field, rs) {
                    crate::flat_bail!(
                        codec,
                        "record codec",
                        "field {} contains a separator and no quote is configured: {:?}",
                        k + 1,
                        String::from_utf8_lossy(field)
                    );
                }
                out.extend_from_slice(field);
            }
        }
    }
    out.extend_from_slice(rs);
    Ok(out)
}

/// Terminate an already composed record.
///
/// # Errors
/// The record must not contain the record separator.
pub fn raw_record(format: &RecordFormat, record: &[u8]) -> Result<Vec<u8>> {
    let rs = format.record_separator();
    if contains(record, rs) {
        crate::flat_bail!(
            codec,
            "record codec",
            "record contains the record separator: {:?}",
            String::from_utf8_lossy(record)
        );
    }
    Ok(concat(record, rs))
}

#[derive(Debug)]
struct ReaderInner {
    scanner: RecordScanner,
    ready: VecDeque<Vec<u8>>,
    eof: bool,
    /// Framing failure at end of input, reported after the records before it.
    failure: Option<anyhow::Error>,
    bytes: u64,
    chunks: u64,
}

/// Scanner state fed from read notifications.
///
/// Notifications may arrive on the I/O worker thread, so everything sits behind
/// one lock.
#[derive(Debug)]
struct ReaderState {
    inner: Mutex<ReaderInner>,
}

impl ReaderState {
    fn new(format: RecordFormat) -> Self {
        Self {
            inner: Mutex::new(ReaderInner {
                scanner: RecordScanner::new(format),
                ready: VecDeque::new(),
                eof: false,
                failure: None,
                bytes: 0,
                chunks: 0,
            }),
        }
    }
}

impl ReadSink for ReaderState {
    fn read_complete(&self, chunk: ReadChunk<'_>) {
        let mut s = self.inner.lock();
        if chunk.is_eof() {
            match s.scanner.finish() {
                Ok(Some(last)) => s.ready.push_back(last),
                Ok(None) => {}
                Err(err) => s.failure = Some(err),
            }
            s.eof = true;
            return;
        }
        let records = s.scanner.feed(chunk.data);
        trace!("chunk at {}: {} bytes, {} records", chunk.offset, chunk.len(), records.len());
        s.ready.extend(records);
        s.bytes += chunk.len() as u64;
        s.chunks += 1;
    }
}

/// Streams records out of a file.
///
/// ```no_run
/// use flatbridge::config::IoConfig;
/// use flatbridge::io::record::{RecordFormat, RecordReader};
///
/// let fmt = RecordFormat::new(b"\n".to_vec(), Some(b";".to_vec()), None)?;
/// let mut reader = RecordReader::open("orders.txt", fmt, IoConfig::default())?;
/// while let Some(batch) = reader.next_batch()? {
///     for record in batch {
///         let fields = reader.split(&record)?;
///         println!("{} fields", fields.len());
///     }
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct RecordReader {
    file: AsyncFile,
    state: Arc<ReaderState>,
    format: RecordFormat,
    chunk_size: usize,
    read_ahead: usize,
}

impl RecordReader {
    /// # Errors
    /// Fails if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, format: RecordFormat, config: IoConfig) -> Result<Self> {
        let chunk_size = config.chunk_size.max(1);
        let read_ahead = config.low_water.max(1);
        let file = AsyncFile::open(path, Access::Read, config)?;
        let state = Arc::new(ReaderState::new(format.clone()));
        file.subscribe(state.clone());
        Ok(Self {
            file,
            state,
            format,
            chunk_size,
            read_ahead,
        })
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    /// Bytes delivered so far.
    pub fn bytes_read(&self) -> u64 {
        self.state.inner.lock().bytes
    }

    /// Next group of complete records, or `None` once the file is exhausted.
    ///
    /// # Errors
    /// Returns read failures captured by the I/O engine.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        loop {
            {
                let mut s = self.state.inner.lock();
                if !s.ready.is_empty() {
                    return Ok(Some(s.ready.drain(..).collect()));
                }
                if let Some(err) = s.failure.take() {
                    return Err(err.context(self.file.path().display().to_string()));
                }
                if s.eof {
                    return Ok(None);
                }
            }
            for _ in 0..self.read_ahead {
                if !self.file.read(self.chunk_size)? {
                    break;
                }
            }
            self.file.wait_for_drain()?;
        }
    }

    /// Read every record of the file, starting over from offset 0.
    ///
    /// # Errors
    /// Returns read failures captured by the I/O engine.
    pub fn read_all(&mut self) -> Result<Vec<Vec<u8>>> {
        {
            let mut s = self.state.inner.lock();
            s.scanner.reset();
            s.ready.clear();
            s.eof = false;
            s.failure = None;
        }
        self.file.read_all_sequential(self.chunk_size)?;
        let mut s = self.state.inner.lock();
        if let Some(err) = s.failure.take() {
            return Err(err.context(self.file.path().display().to_string()));
        }
        debug!(
            "{}: {} records from {} bytes in {} chunks",
            self.file.path().display(),
            s.ready.len(),
            s.bytes,
            s.chunks
        );
        Ok(s.ready.drain(..).collect())
    }

    /// Split a record read by this reader into fields.
    pub fn split(&self, record: &[u8]) -> Result<Vec<Vec<u8>>> {
        split_fields(&self.format, record)
    }

    /// Issue a single read and report how many complete records it produced.
    fn read_once(&mut self) -> Result<usize> {
        self.file.read(self.chunk_size)?;
        self.file.wait_for_drain()?;
        Ok(self.state.inner.lock().ready.len())
    }
}

/// Buffers serialized records and hands them to the I/O queue in chunks.
pub struct RecordWriter {
    file: AsyncFile,
    format: RecordFormat,
    chunk_size: usize,
    pending: Vec<u8>,
    records: u64,
}

impl RecordWriter {
    /// Create (or truncate) `path`.
    ///
    /// # Errors
    /// Fails if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, format: RecordFormat, config: IoConfig) -> Result<Self> {
        let chunk_size = config.chunk_size.max(1);
        let file = AsyncFile::open(path, Access::Write, config)?;
        Ok(Self {
            file,
            format,
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
            records: 0,
        })
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    /// Records accepted so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Serialize records made of fields.
    ///
    /// # Errors
    /// Codec errors for content that violates the quoting rules, and write
    /// failures in synchronous mode.
    pub fn write_records(&mut self, records: &[Vec<Vec<u8>>]) -> Result<()> {
        for (i, fields) in records.iter().enumerate() {
            let bytes = join_fields(&self.format, fields)
                .with_context(|| format!("format record #{}", self.records + i as u64 + 1))?;
            self.push(bytes)?;
        }
        Ok(())
    }

    /// Write records that are already composed (fixed-width layouts).
    ///
    /// # Errors
    /// A record containing the record separator is a codec error.
    pub fn write_raw(&mut self, records: &[Vec<u8>]) -> Result<()> {
        for (i, record) in records.iter().enumerate() {
            let bytes = raw_record(&self.format, record)
                .with_context(|| format!("format record #{}", self.records + i as u64 + 1))?;
            self.push(bytes)?;
        }
        Ok(())
    }

    fn push(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(&bytes);
        self.records += 1;
        if self.pending.len() >= self.chunk_size {
            self.hand_off()?;
        }
        Ok(())
    }

    fn hand_off(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
        self.file.write(batch, None)
    }

    /// Queue buffered bytes and wait until everything is on disk.
    ///
    /// # Errors
    /// Returns write failures captured by the I/O engine.
    pub fn flush(&mut self) -> Result<()> {
        self.hand_off()?;
        self.file.wait_for_drain()
    }

    /// Flush and close, returning the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        debug!("{}: {} records written", self.file.path().display(), self.records);
        Ok(self.records)
    }
}

/// Guess the record separator of an existing file.
///
/// Tries CRLF, CR and LF in that order and keeps the first one that yields at
/// least one complete record from a real read of the first chunk. An empty file
/// defaults to LF.
///
/// # Errors
/// Fails when the file cannot be read or no candidate terminates a record.
pub fn sniff_record_separator(path: impl AsRef<Path>, config: &IoConfig) -> Result<Vec<u8>> {
    let path = path.as_ref();
    for candidate in SNIFF_CANDIDATES {
        let format = RecordFormat::lines(candidate)?;
        let mut reader = RecordReader::open(path, format, config.clone())?;
        if reader.file.is_empty()? {
            debug!("{}: empty file, defaulting record separator to LF", path.display());
            return Ok(b"\n".to_vec());
        }
        if reader.read_once()? > 0 {
            debug!(
                "{}: record separator detected as {:?}",
                path.display(),
                String::from_utf8_lossy(candidate)
            );
            return Ok(candidate.to_vec());
        }
    }
    Err(FlatError::codec(
        format!("file {}", path.display()),
        format!("no record separator found in the first {} bytes", config.chunk_size),
    )
    .into())
}
