//! Indexed access to one delimited data file.
//!
//! [`DataFile`] wraps a single physical file plus its [`FileDescriptor`]
//! and offers two access paths: a restartable, memory-bounded sequential
//! scan, and random access by position or identifier backed by a lazily
//! built byte-offset index. The index costs one offset per row, not one
//! buffer per file, which is what keeps multi-gigabyte archives readable.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::descriptor::FileDescriptor;
use crate::error::{Error, Result};
use crate::rows::{split_fields, CoreRow, ExtensionRow};

const IO_BUF_BYTES: usize = 1 << 20;

/// Explicit cache-on-first-access state for the lazily built indexes.
#[derive(Debug)]
enum IndexState<T> {
    NotBuilt,
    Building,
    Built(T),
}

/// Byte offset of each row's start, plus identifier lookups recorded in the
/// same pass. `by_id` keys on the file's identifier column (id for the
/// core, coreid for extensions); position lists are in ascending order.
#[derive(Debug)]
struct OffsetIndex {
    offsets: Vec<u64>,
    by_id: FxHashMap<String, Vec<u64>>,
}

/// One physical data file of the archive.
#[derive(Debug)]
pub struct DataFile {
    descriptor: FileDescriptor,
    file: BufReader<File>,
    /// Byte offset of the first record, after the header lines.
    data_start: u64,
    /// Sequential cursor: offset of the next record to stream.
    stream_offset: u64,
    /// Position of the next record the sequential cursor will yield.
    next_position: u64,
    /// Set whenever the underlying file position no longer matches
    /// `stream_offset` (random access, index build). The next sequential
    /// read re-seeks first.
    stream_dirty: bool,
    index: IndexState<OffsetIndex>,
}

impl DataFile {
    /// Open the data file described by `descriptor` under `dir`.
    ///
    /// Fails with [`Error::InvalidArchive`] when the referenced file does
    /// not exist. No index is built here.
    pub(crate) fn open(dir: &Path, descriptor: FileDescriptor) -> Result<Self> {
        let path = dir.join(&descriptor.location);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::InvalidArchive(format!(
                    "{} is referenced in the metafile but missing",
                    descriptor.location
                ))
            } else {
                Error::Io(e)
            }
        })?;

        let mut datafile = Self {
            descriptor,
            file: BufReader::with_capacity(IO_BUF_BYTES, file),
            data_start: 0,
            stream_offset: 0,
            next_position: 0,
            stream_dirty: false,
            index: IndexState::NotBuilt,
        };
        datafile.data_start = datafile.skip_header_lines()?;
        datafile.stream_offset = datafile.data_start;
        Ok(datafile)
    }

    pub(crate) fn location(&self) -> &str {
        &self.descriptor.location
    }

    pub(crate) fn is_core(&self) -> bool {
        self.descriptor.is_core
    }

    fn skip_header_lines(&mut self) -> Result<u64> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut offset = 0u64;
        for _ in 0..self.descriptor.dialect.lines_to_ignore {
            match self.read_raw_record()? {
                Some((_, consumed)) => offset += consumed,
                None => break,
            }
        }
        Ok(offset)
    }

    /// Restart the sequential scan from the first record. Does not discard
    /// an already built index.
    pub(crate) fn rewind(&mut self) {
        self.stream_offset = self.data_start;
        self.next_position = 0;
        self.stream_dirty = true;
    }

    /// Next raw record of the sequential scan: `(position, bytes)`, or
    /// `None` at clean EOF. Advances by exactly one physical record.
    fn next_record(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        if self.stream_dirty {
            self.file.seek(SeekFrom::Start(self.stream_offset))?;
            self.stream_dirty = false;
        }
        match self.read_raw_record()? {
            None => Ok(None),
            Some((bytes, consumed)) => {
                let position = self.next_position;
                self.stream_offset += consumed;
                self.next_position += 1;
                Ok(Some((position, bytes)))
            }
        }
    }

    fn read_raw_record(&mut self) -> Result<Option<(Vec<u8>, u64)>> {
        read_record(
            &mut self.file,
            self.descriptor.dialect.lines_terminated_by.as_bytes(),
            self.descriptor.dialect.quote_byte(),
        )
    }

    fn decode(&self, bytes: &[u8], position: u64) -> Result<String> {
        let encoding = self.descriptor.dialect.encoding;
        let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
        if had_errors {
            return Err(Error::Decode {
                position,
                encoding: encoding.name(),
            });
        }
        Ok(text.into_owned())
    }

    /// Next parsed core row of the sequential scan.
    ///
    /// A decode failure is reported for that row only; the cursor has
    /// already advanced, so the scan can continue past it.
    pub(crate) fn next_core_row(&mut self) -> Result<Option<CoreRow>> {
        debug_assert!(self.descriptor.is_core);
        match self.next_record()? {
            None => Ok(None),
            Some((position, bytes)) => {
                let text = self.decode(&bytes, position)?;
                CoreRow::parse(&text, position, &self.descriptor).map(Some)
            }
        }
    }

    /// Build the offset index (and the identifier side map) in one forward
    /// scan. A no-op when already built.
    pub(crate) fn ensure_index(&mut self) -> Result<()> {
        if matches!(self.index, IndexState::Built(_)) {
            return Ok(());
        }
        self.index = IndexState::Building;
        match self.build_index() {
            Ok(index) => {
                self.index = IndexState::Built(index);
                Ok(())
            }
            Err(e) => {
                self.index = IndexState::NotBuilt;
                Err(e)
            }
        }
    }

    fn build_index(&mut self) -> Result<OffsetIndex> {
        debug!(file = %self.descriptor.location, "building offset index");
        self.file.seek(SeekFrom::Start(self.data_start))?;
        self.stream_dirty = true;

        let identifier_index = self.descriptor.identifier_index();
        let mut offsets = Vec::new();
        let mut by_id: FxHashMap<String, Vec<u64>> = FxHashMap::default();
        let mut offset = self.data_start;
        while let Some((bytes, consumed)) = self.read_raw_record()? {
            let position = offsets.len() as u64;
            offsets.push(offset);
            offset += consumed;

            let Some(id_column) = identifier_index else {
                continue;
            };
            // Rows that don't decode can't contribute an identifier; they
            // still get an offset and fail at their own retrieval instead.
            let Ok(text) = self.decode(&bytes, position) else {
                debug!(
                    file = %self.descriptor.location,
                    position, "skipping identifier of undecodable row"
                );
                continue;
            };
            let fields = split_fields(
                &text,
                &self.descriptor.dialect.fields_terminated_by,
                self.descriptor.dialect.fields_enclosed_by,
            );
            if let Some(id) = fields.get(id_column) {
                by_id.entry(id.clone()).or_default().push(position);
            }
        }

        debug!(
            file = %self.descriptor.location,
            rows = offsets.len(),
            identifiers = by_id.len(),
            "offset index built"
        );
        Ok(OffsetIndex { offsets, by_id })
    }

    fn built_index(&mut self) -> Result<&OffsetIndex> {
        self.ensure_index()?;
        match &self.index {
            IndexState::Built(index) => Ok(index),
            _ => unreachable!("index built above"),
        }
    }

    /// Total row count, header lines excluded. Builds the index.
    pub(crate) fn row_count(&mut self) -> Result<u64> {
        Ok(self.built_index()?.offsets.len() as u64)
    }

    /// Identifier column value mapped to ascending row positions.
    pub(crate) fn identifier_map(&mut self) -> Result<&FxHashMap<String, Vec<u64>>> {
        Ok(&self.built_index()?.by_id)
    }

    /// Ascending positions of the rows whose identifier column equals
    /// `key`; empty when there are none.
    pub(crate) fn positions_for_id(&mut self, key: &str) -> Result<Vec<u64>> {
        Ok(self
            .built_index()?
            .by_id
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn record_at(&mut self, position: u64) -> Result<Vec<u8>> {
        let offset = {
            let index = self.built_index()?;
            *index
                .offsets
                .get(usize::try_from(position).map_err(|_| Error::RowNotFound)?)
                .ok_or(Error::RowNotFound)?
        };
        self.file.seek(SeekFrom::Start(offset))?;
        self.stream_dirty = true;
        match self.read_raw_record()? {
            Some((bytes, _)) => Ok(bytes),
            None => Err(Error::RowNotFound),
        }
    }

    /// Core row at `position`. Seeks to the indexed offset and parses
    /// exactly one record.
    pub(crate) fn core_row_at(&mut self, position: u64) -> Result<CoreRow> {
        debug_assert!(self.descriptor.is_core);
        let bytes = self.record_at(position)?;
        let text = self.decode(&bytes, position)?;
        CoreRow::parse(&text, position, &self.descriptor)
    }

    /// Extension row at `position`.
    pub(crate) fn extension_row_at(&mut self, position: u64) -> Result<ExtensionRow> {
        debug_assert!(!self.descriptor.is_core);
        let bytes = self.record_at(position)?;
        let text = self.decode(&bytes, position)?;
        ExtensionRow::parse(&text, position, &self.descriptor)
    }

    /// Core row whose id column equals `id`.
    ///
    /// Identifiers are not guaranteed unique by the format; duplicates
    /// resolve to the first occurrence by ascending position.
    pub(crate) fn core_row_by_id(&mut self, id: &str) -> Result<CoreRow> {
        let position = self
            .built_index()?
            .by_id
            .get(id)
            .and_then(|positions| positions.first())
            .copied()
            .ok_or(Error::RowNotFound)?;
        self.core_row_at(position)
    }

    /// Check the descriptor's column references against the file's first
    /// record. Files with no rows (or an undecodable first row) pass; the
    /// per-row guard still applies at retrieval time.
    pub(crate) fn validate_field_bounds(&mut self) -> Result<()> {
        let Some(max) = self.descriptor.max_referenced_index() else {
            return Ok(());
        };
        self.rewind();
        let record = self.next_record()?;
        self.rewind();
        let Some((_, bytes)) = record else {
            return Ok(());
        };
        let Ok(text) = self.decode(&bytes, 0) else {
            return Ok(());
        };
        let count = split_fields(
            &text,
            &self.descriptor.dialect.fields_terminated_by,
            self.descriptor.dialect.fields_enclosed_by,
        )
        .len();
        if max >= count {
            return Err(Error::InvalidArchive(format!(
                "{}: the descriptor references column {max}, but rows have {count} columns",
                self.descriptor.location
            )));
        }
        Ok(())
    }
}

/// Read one raw record from the current stream position.
///
/// Returns the record bytes (terminator stripped) and the total bytes
/// consumed, or `None` at clean EOF. The terminator only ends the record
/// outside an enclosure, so quoted fields may span lines. A final record
/// without a trailing terminator is still returned.
fn read_record(
    file: &mut BufReader<File>,
    terminator: &[u8],
    quote: Option<u8>,
) -> Result<Option<(Vec<u8>, u64)>> {
    let mut record = Vec::new();
    let mut consumed_total = 0u64;
    let mut in_quotes = false;

    loop {
        let buf = file.fill_buf()?;
        if buf.is_empty() {
            if consumed_total == 0 {
                return Ok(None);
            }
            return Ok(Some((record, consumed_total)));
        }

        let mut used = 0usize;
        let mut done = false;
        for &byte in buf {
            used += 1;
            record.push(byte);
            if let Some(q) = quote {
                if byte == q {
                    in_quotes = !in_quotes;
                }
            }
            if !in_quotes && record.ends_with(terminator) {
                record.truncate(record.len() - terminator.len());
                done = true;
                break;
            }
        }
        file.consume(used);
        consumed_total += used as u64;
        if done {
            return Ok(Some((record, consumed_total)));
        }
    }
}
