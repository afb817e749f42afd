//! High-level access to one opened Darwin Core Archive.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::container::Container;
use crate::datafile::DataFile;
use crate::descriptor::{
    ArchiveDescriptor, FileDescriptor, DATASET_ID_TERM, METADATA_NAME, METAFILE_NAME,
};
use crate::error::{Error, Result};
use crate::rows::{CoreRow, ExtensionRow};
use crate::star::{JoinKind, StarRecords};

/// Directory of per-dataset metadata documents inside the archive.
const SOURCE_METADATA_DIRECTORY: &str = "dataset";

/// Options for [`ArchiveReader::open_with`].
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Locations (relative to the archive root) of extension data files to
    /// skip entirely. No offset or join index is ever built for a skipped
    /// extension, and its rows never appear in any resolution. Names not
    /// present in the archive are silently ignored.
    pub extensions_to_ignore: Vec<String>,
}

impl ReaderOptions {
    /// Add one extension file location to the exclusion set.
    pub fn ignore_extension(mut self, location: impl Into<String>) -> Self {
        self.extensions_to_ignore.push(location.into());
        self
    }
}

struct OpenFiles {
    core: DataFile,
    extensions: Vec<DataFile>,
}

/// A Darwin Core Archive opened for reading.
///
/// The reader moves through `Closed -> Opening -> Open -> Closed`:
/// [`open`](Self::open) performs the `Opening` work (container, descriptor,
/// per-file handles; no index is built eagerly) and either returns an
/// `Open` reader or fails without a partial state. Every query operation
/// requires `Open`; after [`close`](Self::close) they all fail with
/// [`Error::Closed`].
///
/// The reader exclusively owns its file handles and lazily built indexes.
/// It is not meant to be shared between threads; concurrent access needs
/// independent readers or external serialization.
pub struct ArchiveReader {
    container: Container,
    descriptor: ArchiveDescriptor,
    metadata: Option<Arc<str>>,
    source_metadata: FxHashMap<String, Arc<str>>,
    /// `None` once closed.
    files: Option<OpenFiles>,
}

impl ArchiveReader {
    /// Open the archive at `path`: a zip file, a (gzip-compressed) tar
    /// file, or a plain directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    /// Open with explicit [`ReaderOptions`].
    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let container = Container::open(path)?;
        let root = container.content_root().to_path_buf();

        let metafile_path = root.join(METAFILE_NAME);
        let descriptor = if metafile_path.is_file() {
            let metafile = std::fs::read_to_string(&metafile_path)?;
            ArchiveDescriptor::parse(&metafile, &options.extensions_to_ignore)?
        } else {
            ArchiveDescriptor::from_single_file(&find_simple_datafile(&root)?)?
        };

        let metadata = load_metadata(&root, descriptor.metadata_location.as_deref())?;
        let source_metadata = load_source_metadata(&root)?;

        let mut core = DataFile::open(&root, descriptor.core.clone())?;
        core.validate_field_bounds()?;
        let mut extensions = Vec::with_capacity(descriptor.extensions.len());
        for extension_descriptor in &descriptor.extensions {
            let mut extension = DataFile::open(&root, extension_descriptor.clone())?;
            extension.validate_field_bounds()?;
            extensions.push(extension);
        }

        info!(
            archive = %path.display(),
            core = %descriptor.core.location,
            extensions = extensions.len(),
            "archive opened"
        );

        Ok(Self {
            container,
            descriptor,
            metadata,
            source_metadata,
            files: Some(OpenFiles { core, extensions }),
        })
    }

    fn files_mut(&mut self) -> Result<&mut OpenFiles> {
        self.files.as_mut().ok_or(Error::Closed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.files.is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// The archive descriptor, parsed from the metafile or inferred from
    /// the single data file.
    pub fn descriptor(&self) -> Result<&ArchiveDescriptor> {
        self.ensure_open()?;
        Ok(&self.descriptor)
    }

    /// Location of the core data file, relative to the archive root.
    pub fn core_location(&self) -> Result<&str> {
        self.ensure_open()?;
        Ok(&self.descriptor.core.location)
    }

    /// True if the archive makes use of extensions.
    pub fn uses_extensions(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(!self.descriptor.extensions.is_empty())
    }

    /// The scientific metadata document (EML) as raw text, when present.
    pub fn metadata(&self) -> Result<Option<&str>> {
        self.ensure_open()?;
        Ok(self.metadata.as_deref())
    }

    /// Per-dataset metadata documents keyed by dataset identifier, when
    /// the archive carries a `dataset/` directory.
    pub fn source_metadata(&self) -> Result<&FxHashMap<String, Arc<str>>> {
        self.ensure_open()?;
        Ok(&self.source_metadata)
    }

    /// True if the core file declares the `term_url` term.
    pub fn core_contains_term(&self, term_url: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.descriptor.core.contains_term(term_url))
    }

    /// Descriptor of the data file at `relative_path`.
    ///
    /// Fails with [`Error::NotADataFile`] for archive members the metafile
    /// does not declare as data files.
    pub fn descriptor_for(&self, relative_path: &str) -> Result<&FileDescriptor> {
        self.ensure_open()?;
        std::iter::once(&self.descriptor.core)
            .chain(&self.descriptor.extensions)
            .find(|d| d.location == relative_path)
            .ok_or_else(|| Error::NotADataFile(relative_path.to_string()))
    }

    /// Absolute path of an archive member.
    ///
    /// For zipped archives this points into the temporary extraction
    /// directory, which disappears on close. Existence is not checked.
    pub fn absolute_path(&self, relative_path: &str) -> Result<PathBuf> {
        self.ensure_open()?;
        Ok(self.container.content_root().join(relative_path))
    }

    /// Raw pass-through access to any archive member (citations, rights,
    /// ...). The content is not parsed.
    pub fn open_included_file(&self, relative_path: &str) -> Result<File> {
        Ok(File::open(self.absolute_path(relative_path)?)?)
    }

    /// Lazy sequence of core rows in file order.
    ///
    /// Restartable: each call starts a fresh pass from the first row.
    /// Iteration streams and needs no offset index; an index built earlier
    /// in the session stays valid.
    pub fn iterate(&mut self) -> Result<CoreRows<'_>> {
        self.files_mut()?.core.rewind();
        Ok(CoreRows { reader: self })
    }

    /// All core rows, eagerly materialized.
    ///
    /// Memory-expensive: suitable for small archives only. Prefer
    /// [`iterate`](Self::iterate) otherwise.
    pub fn rows_all(&mut self) -> Result<Vec<CoreRow>> {
        self.iterate()?.collect()
    }

    /// Number of rows in the core file. Builds the offset index.
    pub fn row_count(&mut self) -> Result<u64> {
        self.files_mut()?.core.row_count()
    }

    /// Core row at `position` (0-based, header lines excluded).
    pub fn get_row_by_position(&mut self, position: u64) -> Result<CoreRow> {
        let files = self.files.as_mut().ok_or(Error::Closed)?;
        let mut row = files.core.core_row_at(position)?;
        link_source_metadata(&self.source_metadata, &mut row);
        Ok(row)
    }

    /// Core row whose id is `id`.
    ///
    /// The format does not guarantee unique ids; duplicates resolve to the
    /// first occurrence by ascending position. Missing ids fail with
    /// [`Error::RowNotFound`].
    pub fn get_row_by_id(&mut self, id: &str) -> Result<CoreRow> {
        let files = self.files.as_mut().ok_or(Error::Closed)?;
        let mut row = files.core.core_row_by_id(id)?;
        link_source_metadata(&self.source_metadata, &mut row);
        Ok(row)
    }

    /// Lazy sequence of the extension rows whose join key is `core_id`,
    /// across extension files in metafile declaration order, in ascending
    /// position within each file.
    ///
    /// Rows are parsed on demand from their indexed offsets. A key that
    /// matches no core row (an orphan key) resolves to nothing.
    pub fn extensions_for(&mut self, core_id: &str) -> Result<ExtensionRows<'_>> {
        let files = self.files.as_mut().ok_or(Error::Closed)?;

        let known = files.core.identifier_map()?.contains_key(core_id);
        let mut batches = Vec::new();
        if known {
            for (file_index, extension) in files.extensions.iter_mut().enumerate() {
                let positions = extension.positions_for_id(core_id)?;
                if !positions.is_empty() {
                    batches.push((file_index, positions));
                }
            }
        }
        Ok(ExtensionRows {
            extensions: &mut files.extensions,
            batches: batches.into_iter(),
            current: None,
        })
    }

    /// Extension rows related to `row`, resolved through its id.
    ///
    /// Convenience over [`extensions_for`](Self::extensions_for); a row
    /// without an id has no extensions.
    pub fn extensions_of(&mut self, row: &CoreRow) -> Result<ExtensionRows<'_>> {
        match &row.id {
            Some(id) => self.extensions_for(id),
            None => {
                let files = self.files.as_mut().ok_or(Error::Closed)?;
                Ok(ExtensionRows {
                    extensions: &mut files.extensions,
                    batches: Vec::new().into_iter(),
                    current: None,
                })
            }
        }
    }

    /// Joined iteration over the data files at `locations`, matched on
    /// their join key (id for the core, coreid for extensions). The core
    /// may be part of the selection; it is not treated specially.
    ///
    /// Every combination of rows sharing a key is yielded once, one
    /// combination per item, rows in selection order. See [`JoinKind`] for
    /// the inner/outer key-set semantics and [`StarRecords`] for the
    /// ordering guarantees.
    ///
    /// Fails with [`Error::NotADataFile`] when a location is not a declared
    /// data file, and with [`Error::InvalidArchive`] when a location is
    /// selected twice.
    pub fn star_records(&mut self, locations: &[&str], join: JoinKind) -> Result<StarRecords<'_>> {
        let files = self.files.as_mut().ok_or(Error::Closed)?;

        let mut core_slot = Some(&mut files.core);
        let mut extension_slots: Vec<Option<&mut DataFile>> =
            files.extensions.iter_mut().map(Some).collect();

        let mut selected = Vec::with_capacity(locations.len());
        for &location in locations {
            let slot = if location == self.descriptor.core.location {
                core_slot.take()
            } else if let Some(i) = self
                .descriptor
                .extensions
                .iter()
                .position(|d| d.location == location)
            {
                extension_slots[i].take()
            } else {
                return Err(Error::NotADataFile(location.to_string()));
            };
            let file = slot.ok_or_else(|| {
                Error::InvalidArchive(format!("{location} was selected twice for a star join"))
            })?;
            selected.push(file);
        }
        StarRecords::new(selected, join)
    }

    /// Extension rows referencing non-existent core rows, as
    /// `(extension location, join key -> ascending positions)` in metafile
    /// declaration order.
    ///
    /// Orphans are diagnostics, not errors, and are excluded from
    /// [`extensions_for`](Self::extensions_for) results.
    pub fn orphaned_extension_rows(&mut self) -> Result<Vec<(String, FxHashMap<String, Vec<u64>>)>> {
        let files = self.files.as_mut().ok_or(Error::Closed)?;
        if files.extensions.is_empty() {
            return Ok(Vec::new());
        }

        let core_ids: FxHashSet<String> = files.core.identifier_map()?.keys().cloned().collect();
        let mut out = Vec::with_capacity(files.extensions.len());
        for extension in &mut files.extensions {
            let mut orphans = extension.identifier_map()?.clone();
            orphans.retain(|key, _| !core_ids.contains(key));
            debug!(
                file = %extension.location(),
                orphan_keys = orphans.len(),
                "orphan scan"
            );
            out.push((extension.location().to_string(), orphans));
        }
        Ok(out)
    }

    /// Close the archive: release file handles and built indexes, remove
    /// the temporary extraction directory. Idempotent; every later call on
    /// the reader fails with [`Error::Closed`].
    pub fn close(&mut self) -> Result<()> {
        self.files = None;
        self.container.cleanup()
    }

    fn next_core_row_linked(&mut self) -> Result<Option<CoreRow>> {
        let files = self.files.as_mut().ok_or(Error::Closed)?;
        match files.core.next_core_row()? {
            None => Ok(None),
            Some(mut row) => {
                link_source_metadata(&self.source_metadata, &mut row);
                Ok(Some(row))
            }
        }
    }
}

/// Sequential core row iteration, obtained from
/// [`ArchiveReader::iterate`].
pub struct CoreRows<'a> {
    reader: &'a mut ArchiveReader,
}

impl Iterator for CoreRows<'_> {
    type Item = Result<CoreRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_core_row_linked().transpose()
    }
}

/// Lazy star-join resolution, obtained from
/// [`ArchiveReader::extensions_for`].
pub struct ExtensionRows<'a> {
    extensions: &'a mut Vec<DataFile>,
    batches: std::vec::IntoIter<(usize, Vec<u64>)>,
    current: Option<(usize, std::vec::IntoIter<u64>)>,
}

impl Iterator for ExtensionRows<'_> {
    type Item = Result<ExtensionRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((file_index, positions)) = &mut self.current {
                if let Some(position) = positions.next() {
                    return Some(self.extensions[*file_index].extension_row_at(position));
                }
                self.current = None;
            }
            let (file_index, positions) = self.batches.next()?;
            self.current = Some((file_index, positions.into_iter()));
        }
    }
}

fn link_source_metadata(source_metadata: &FxHashMap<String, Arc<str>>, row: &mut CoreRow) {
    row.source_metadata = row
        .data
        .get(DATASET_ID_TERM)
        .and_then(|dataset_id| source_metadata.get(dataset_id))
        .cloned();
}

/// Locate the data file of a metafile-less archive: a single file, or two
/// files one of which is the conventional metadata document.
fn find_simple_datafile(root: &Path) -> Result<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(root)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let datafile = match files.as_slice() {
        [single] => Some(single.clone()),
        [_, _] => files
            .iter()
            .find(|path| path.file_name().is_some_and(|n| n != METADATA_NAME))
            .filter(|_| {
                files
                    .iter()
                    .any(|path| path.file_name().is_some_and(|n| n == METADATA_NAME))
            })
            .cloned(),
        _ => None,
    };
    datafile.ok_or_else(|| {
        Error::InvalidArchive(
            "no metafile was found, but the archive contains multiple files".to_string(),
        )
    })
}

fn load_metadata(root: &Path, declared: Option<&str>) -> Result<Option<Arc<str>>> {
    let (name, required) = match declared {
        Some(name) => (name, true),
        None => (METADATA_NAME, false),
    };
    match std::fs::read_to_string(root.join(name)) {
        Ok(text) => {
            roxmltree::Document::parse(&text).map_err(|e| {
                Error::InvalidArchive(format!("malformed metadata document {name}: {e}"))
            })?;
            Ok(Some(Arc::from(text.as_str())))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if required {
                Err(Error::InvalidArchive(format!(
                    "{name} is referenced in the archive descriptor but missing"
                )))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn load_source_metadata(root: &Path) -> Result<FxHashMap<String, Arc<str>>> {
    let dir = root.join(SOURCE_METADATA_DIRECTORY);
    let mut out = FxHashMap::default();
    if !dir.is_dir() {
        return Ok(out);
    }

    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(dataset_key) = path.file_stem().map(|s| s.to_string_lossy().into_owned())
        else {
            continue;
        };
        let text = std::fs::read_to_string(&path)?;
        if roxmltree::Document::parse(&text).is_err() {
            warn!(file = %path.display(), "skipping malformed source metadata document");
            continue;
        }
        out.insert(dataset_key, Arc::from(text.as_str()));
    }
    Ok(out)
}
