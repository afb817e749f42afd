//! Archive and data file descriptors.
//!
//! [`ArchiveDescriptor`] is parsed from the metafile (`meta.xml`) and lists
//! one core [`FileDescriptor`] plus the extension descriptors in declaration
//! order. For metafile-less archives, a descriptor is inferred from the data
//! file's header row instead ([`FileDescriptor::sniff`]).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use encoding_rs::Encoding;
use roxmltree::Node;

use crate::error::{Error, Result};
use crate::rows::split_fields;

/// Conventional metafile name at the archive root.
pub const METAFILE_NAME: &str = "meta.xml";
/// Conventional name of the scientific metadata document.
pub const METADATA_NAME: &str = "EML.xml";
/// Term whose value keys a core row into the source metadata map.
pub const DATASET_ID_TERM: &str = "http://rs.tdwg.org/dwc/terms/datasetID";

/// Text dialect of one data file, with the metafile's documented defaults.
#[derive(Debug, Clone)]
pub struct Dialect {
    /// Field separator (`fieldsTerminatedBy`). Default: tab.
    pub fields_terminated_by: String,
    /// Record separator (`linesTerminatedBy`). Default: `\n`. May appear
    /// verbatim inside an enclosed field.
    pub lines_terminated_by: String,
    /// Optional enclosure character (`fieldsEnclosedBy`). Default: none.
    pub fields_enclosed_by: Option<char>,
    /// Header lines to skip (`ignoreHeaderLines`). Default: 0.
    pub lines_to_ignore: u64,
    /// Declared text encoding. Default: UTF-8.
    pub encoding: &'static Encoding,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            fields_terminated_by: "\t".to_string(),
            lines_terminated_by: "\n".to_string(),
            fields_enclosed_by: None,
            lines_to_ignore: 0,
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl Dialect {
    /// Enclosure character as a raw byte for record scanning.
    ///
    /// Scanning works on undecoded bytes, so only ASCII-compatible
    /// encodings and ASCII metacharacters are accepted (checked at
    /// descriptor parse time).
    pub(crate) fn quote_byte(&self) -> Option<u8> {
        self.fields_enclosed_by.map(|c| c as u8)
    }

    fn validate(&self) -> Result<()> {
        if !self.encoding.is_ascii_compatible() {
            return Err(Error::InvalidArchive(format!(
                "unsupported data file encoding {}",
                self.encoding.name()
            )));
        }
        if self.lines_terminated_by.is_empty() || self.fields_terminated_by.is_empty() {
            return Err(Error::InvalidArchive(
                "field and line terminators must not be empty".to_string(),
            ));
        }
        if !self.lines_terminated_by.is_ascii() || !self.fields_terminated_by.is_ascii() {
            return Err(Error::InvalidArchive(
                "non-ASCII field or line terminator".to_string(),
            ));
        }
        if let Some(c) = self.fields_enclosed_by {
            if !c.is_ascii() {
                return Err(Error::InvalidArchive(format!(
                    "unsupported fieldsEnclosedBy {c:?}"
                )));
            }
        }
        Ok(())
    }
}

/// One field mapping of a data file: a term bound to a column, or a term
/// carrying a constant default value (no column at all).
#[derive(Debug, Clone)]
pub struct Field {
    /// Term URI naming the semantic meaning of the column.
    pub term: Arc<str>,
    /// Column index in the physical file. `None` for default-only fields.
    pub index: Option<usize>,
    /// Value applied when the column is absent or its value is empty.
    pub default: Option<String>,
}

/// Describes one physical data file of the archive.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// File location, relative to the archive root.
    pub location: String,
    /// Row type URI, `None` for sniffed metafile-less archives.
    pub rowtype: Option<Arc<str>>,
    /// True for the core file, false for extensions.
    pub is_core: bool,
    /// Index of the id column (core files only).
    pub id_index: Option<usize>,
    /// Index of the coreid/join-key column (extension files only).
    pub coreid_index: Option<usize>,
    /// Text dialect of the file.
    pub dialect: Dialect,
    /// Ordered field list.
    pub fields: Vec<Field>,
}

impl FileDescriptor {
    /// Parse one `<core>` or `<extension>` metafile section.
    fn from_metafile_section(section: Node, is_core: bool) -> Result<Self> {
        let location = child(section, "files")
            .and_then(|files| child(files, "location"))
            .and_then(|loc| loc.text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::InvalidArchive(
                    "a data file is referenced in the metafile, but its location is not specified"
                        .to_string(),
                )
            })?
            .to_string();

        let (id_index, coreid_index) = if is_core {
            (index_of_child(section, "id")?, None)
        } else {
            let coreid = index_of_child(section, "coreid")?;
            if coreid.is_none() {
                return Err(Error::InvalidArchive(format!(
                    "extension {location} declares no coreid column"
                )));
            }
            (None, coreid)
        };

        let mut fields = Vec::new();
        for node in section.children().filter(|n| n.is_element()) {
            if node.tag_name().name() != "field" {
                continue;
            }
            let term = node.attribute("term").ok_or_else(|| {
                Error::InvalidArchive(format!("a field of {location} has no term attribute"))
            })?;
            let index = match node.attribute("index") {
                Some(raw) => Some(parse_index(raw, &location)?),
                None => None,
            };
            fields.push(Field {
                term: Arc::from(term),
                index,
                default: node.attribute("default").map(str::to_string),
            });
        }

        let encoding_label = section.attribute("encoding").unwrap_or("utf-8");
        let encoding = Encoding::for_label(encoding_label.as_bytes()).ok_or_else(|| {
            Error::InvalidArchive(format!("unknown encoding {encoding_label} for {location}"))
        })?;

        let lines_to_ignore = match section.attribute("ignoreHeaderLines") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::InvalidArchive(format!("invalid ignoreHeaderLines for {location}: {raw}"))
            })?,
            None => 0,
        };

        let fields_enclosed_by = match section.attribute("fieldsEnclosedBy") {
            Some(raw) => {
                let decoded = unescape_attribute(raw);
                decoded.chars().next()
            }
            None => None,
        };

        let dialect = Dialect {
            fields_terminated_by: section
                .attribute("fieldsTerminatedBy")
                .map(unescape_attribute)
                .unwrap_or_else(|| "\t".to_string()),
            lines_terminated_by: section
                .attribute("linesTerminatedBy")
                .map(unescape_attribute)
                .unwrap_or_else(|| "\n".to_string()),
            fields_enclosed_by,
            lines_to_ignore,
            encoding,
        };
        dialect.validate()?;

        Ok(Self {
            location,
            rowtype: section.attribute("rowType").map(Arc::from),
            is_core,
            id_index,
            coreid_index,
            dialect,
            fields,
        })
    }

    /// Infer a descriptor by inspecting a data file directly.
    ///
    /// Used for metafile-less archives: the header row becomes the field
    /// list, one header line is skipped, and the file is the core.
    pub fn sniff(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut header = Vec::new();
        reader.read_until(b'\n', &mut header)?;

        let lines_terminated_by = if header.ends_with(b"\r\n") { "\r\n" } else { "\n" };
        while header.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            header.pop();
        }
        let header = String::from_utf8_lossy(&header).into_owned();

        let delimiter = ['\t', ',', ';', '|']
            .into_iter()
            .max_by_key(|d| header.matches(*d).count())
            .filter(|d| header.contains(*d))
            .unwrap_or('\t');
        let quote = if header.contains('"') { Some('"') } else { None };

        let dialect = Dialect {
            fields_terminated_by: delimiter.to_string(),
            lines_terminated_by: lines_terminated_by.to_string(),
            fields_enclosed_by: quote,
            lines_to_ignore: 1,
            encoding: encoding_rs::UTF_8,
        };

        let fields = split_fields(&header, &dialect.fields_terminated_by, quote)
            .into_iter()
            .enumerate()
            .map(|(i, column)| Field {
                term: Arc::from(column.as_str()),
                index: Some(i),
                default: None,
            })
            .collect();

        let location = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            location,
            rowtype: None,
            is_core: true,
            id_index: None,
            coreid_index: None,
            dialect,
            fields,
        })
    }

    /// True if `term_url` appears in the field list.
    pub fn contains_term(&self, term_url: &str) -> bool {
        self.fields.iter().any(|f| f.term.as_ref() == term_url)
    }

    /// Index of the identifier column: id for the core, coreid for
    /// extensions.
    pub(crate) fn identifier_index(&self) -> Option<usize> {
        self.id_index.or(self.coreid_index)
    }

    /// Highest column index the descriptor references, if any.
    pub(crate) fn max_referenced_index(&self) -> Option<usize> {
        self.fields
            .iter()
            .filter_map(|f| f.index)
            .chain(self.identifier_index())
            .max()
    }
}

/// The parsed metafile: exactly one core file plus the extensions in
/// declaration order.
#[derive(Debug, Clone)]
pub struct ArchiveDescriptor {
    /// Location of the scientific metadata document, when declared.
    pub metadata_location: Option<String>,
    /// Descriptor of the core data file.
    pub core: FileDescriptor,
    /// Extension descriptors, in metafile order. The order determines
    /// join-result ordering.
    pub extensions: Vec<FileDescriptor>,
}

impl ArchiveDescriptor {
    /// Parse the metafile content.
    ///
    /// Extension files named in `files_to_ignore` are dropped here, before
    /// anything is opened, so no offset or join index is ever built for
    /// them. Names not present in the archive are silently ignored.
    pub fn parse(metafile: &str, files_to_ignore: &[String]) -> Result<Self> {
        let doc = roxmltree::Document::parse(metafile)
            .map_err(|e| Error::InvalidArchive(format!("malformed metafile: {e}")))?;
        let root = doc.root_element();

        let core_section = child(root, "core")
            .ok_or_else(|| Error::InvalidArchive("metafile has no core section".to_string()))?;
        let core = FileDescriptor::from_metafile_section(core_section, true)?;

        let mut extensions = Vec::new();
        for section in root.children().filter(|n| n.is_element()) {
            if section.tag_name().name() != "extension" {
                continue;
            }
            let descriptor = FileDescriptor::from_metafile_section(section, false)?;
            if !files_to_ignore.iter().any(|f| *f == descriptor.location) {
                extensions.push(descriptor);
            }
        }

        Ok(Self {
            metadata_location: root.attribute("metadata").map(str::to_string),
            core,
            extensions,
        })
    }

    /// Infer a single-core-file descriptor for a metafile-less archive.
    pub fn from_single_file(datafile: &Path) -> Result<Self> {
        Ok(Self {
            metadata_location: None,
            core: FileDescriptor::sniff(datafile)?,
            extensions: Vec::new(),
        })
    }

    /// Row type URIs of the extensions in use, in declaration order.
    pub fn extension_types(&self) -> Vec<&str> {
        self.extensions
            .iter()
            .filter_map(|e| e.rowtype.as_deref())
            .collect()
    }
}

/// Shorten a term URI to its last path segment.
///
/// `http://rs.tdwg.org/dwc/terms/scientificName` becomes `scientificName`.
pub fn shorten_term(term: &str) -> &str {
    term.rsplit('/').next().unwrap_or(term)
}

// Namespace-agnostic child lookup. Metafiles carry a default namespace we
// don't care about.
fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn index_of_child(section: Node, name: &str) -> Result<Option<usize>> {
    match child(section, name) {
        Some(node) => match node.attribute("index") {
            Some(raw) => Ok(Some(parse_index(raw, name)?)),
            None => Ok(None),
        },
        None => Ok(None),
    }
}

fn parse_index(raw: &str, context: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| Error::InvalidArchive(format!("invalid column index for {context}: {raw}")))
}

/// Decode backslash escapes in metafile attribute values.
///
/// Metafiles declare control characters as literal `\t`, `\n`, `\r`.
fn unescape_attribute(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
