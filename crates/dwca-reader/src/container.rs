//! Opening the physical archive container.
//!
//! A Darwin Core Archive arrives as a plain directory (read in place), a
//! zip file or a (possibly gzip-compressed) tar file. Compressed forms are
//! extracted to a temporary directory that lives as long as the reader and
//! is removed on close. When the extracted content is a single directory,
//! the real archive root is that directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};

pub(crate) struct Container {
    kind: Kind,
}

enum Kind {
    Directory(PathBuf),
    Extracted {
        /// Taken on cleanup; `None` once the temp dir is gone.
        tmp: Option<TempDir>,
        root: PathBuf,
    },
}

impl Container {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self {
                kind: Kind::Directory(path.to_path_buf()),
            });
        }

        let tmp = TempDir::new()?;
        extract(path, tmp.path())?;
        let root = content_root(tmp.path())?;
        debug!(archive = %path.display(), extracted_to = %root.display(), "archive extracted");
        Ok(Self {
            kind: Kind::Extracted {
                tmp: Some(tmp),
                root,
            },
        })
    }

    pub(crate) fn content_root(&self) -> &Path {
        match &self.kind {
            Kind::Directory(path) => path,
            Kind::Extracted { root, .. } => root,
        }
    }

    /// Remove the temporary extraction directory, if any. Idempotent.
    pub(crate) fn cleanup(&mut self) -> Result<()> {
        if let Kind::Extracted { tmp, .. } = &mut self.kind {
            if let Some(tmp) = tmp.take() {
                tmp.close()?;
            }
        }
        Ok(())
    }
}

/// Unpack a zip or (gzip-compressed) tar archive into `dir`.
fn extract(path: &Path, dir: &Path) -> Result<()> {
    // Zip first, the most common container.
    match zip::ZipArchive::new(File::open(path)?) {
        Ok(mut archive) => {
            archive
                .extract(dir)
                .map_err(|e| Error::InvalidArchive(format!("cannot extract zip: {e}")))?;
            return Ok(());
        }
        Err(_) => {
            // Not a zip, try tar below.
        }
    }

    if tar::Archive::new(GzDecoder::new(File::open(path)?))
        .unpack(dir)
        .is_ok()
    {
        return Ok(());
    }
    if tar::Archive::new(File::open(path)?).unpack(dir).is_ok() {
        return Ok(());
    }

    Err(Error::InvalidArchive(
        "the archive cannot be read; is it a .zip or .tgz file?".to_string(),
    ))
}

/// Apply the single-subdirectory rule: if the extracted content is exactly
/// one directory, the archive content lives under it.
fn content_root(dir: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}
