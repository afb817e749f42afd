//! Darwin Core Archive reader
//!
//! This crate provides descriptor-driven, memory-bounded read access to
//! Darwin Core Archives: a container (zip, tgz or plain directory) holding
//! one core delimited text file, zero or more extension files in a
//! star-schema relationship with the core, an XML metafile describing the
//! per-file dialects, and optional metadata documents.
//!
//! Files are never loaded whole: sequential iteration streams record by
//! record, and random access goes through a lazily built byte-offset index
//! whose memory cost is one offset per row.
//!
//! # Encodings
//!
//! Data files may declare any ASCII-compatible encoding (UTF-8, the
//! Windows and ISO 8859 code pages, ...); records are located at the byte
//! level and decoded per row. Archives declaring an encoding whose
//! delimiter and terminator bytes are not ASCII-transparent, such as
//! UTF-16, are rejected at open time with
//! [`Error::InvalidArchive`].
//!
//! ```no_run
//! use dwca_reader::ArchiveReader;
//!
//! # fn main() -> dwca_reader::Result<()> {
//! let mut archive = ArchiveReader::open("occurrences.zip")?;
//! for row in archive.iterate()? {
//!     let row = row?;
//!     println!("{:?}", row.data.get("http://rs.tdwg.org/dwc/terms/scientificName"));
//! }
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

mod container;
mod datafile;
pub mod descriptor;
pub mod error;
pub mod reader;
pub mod rows;
pub mod star;

pub use descriptor::{shorten_term, ArchiveDescriptor, Dialect, Field, FileDescriptor};
pub use error::{Error, Result};
pub use reader::{ArchiveReader, CoreRows, ExtensionRows, ReaderOptions};
pub use rows::{CoreRow, ExtensionRow, RowData};
pub use star::{JoinKind, StarRecords, StarRow};
