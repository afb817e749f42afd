use thiserror::Error;

/// Errors surfaced while opening or reading a Darwin Core Archive.
#[derive(Error, Debug)]
pub enum Error {
    /// Structural failure detected at open time: missing or malformed
    /// metafile, referenced data file absent, unreadable container, ...
    /// The reader never reaches the open state.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// Lookup by position or id missed.
    #[error("row not found")]
    RowNotFound,

    /// The requested archive member is not declared as a data file.
    #[error("{0} is not a data file")]
    NotADataFile(String),

    /// The bytes of one specific row cannot be decoded with the encoding
    /// declared for its data file. Other rows stay readable.
    #[error("row at position {position} is not valid {encoding}")]
    Decode {
        /// Position of the offending row in its data file.
        position: u64,
        /// Name of the declared encoding.
        encoding: &'static str,
    },

    /// The reader was used after `close()`.
    #[error("archive reader is closed")]
    Closed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, Error>;
