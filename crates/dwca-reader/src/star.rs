//! Joined iteration over several data files sharing a join key.
//!
//! [`StarRecords`] walks the identifier indexes of a caller-selected set of
//! data files (the core may be included; it is not treated specially) and
//! yields, per shared key, every combination of rows across the files
//! carrying that key. [`JoinKind::Inner`] keeps keys present in all
//! selected files, [`JoinKind::Outer`] keeps keys present in any of them
//! without padding the missing files.

use rustc_hash::FxHashSet;

use crate::datafile::DataFile;
use crate::error::Result;
use crate::rows::{CoreRow, ExtensionRow, RowData};

/// How the key sets of the selected files combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Keys present in every selected file.
    Inner,
    /// Keys present in at least one selected file. Combinations only span
    /// the files that actually carry the key.
    Outer,
}

/// One row of a joined combination: core or extension, depending on the
/// file it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum StarRow {
    Core(CoreRow),
    Extension(ExtensionRow),
}

impl StarRow {
    /// Position of the row in its own data file.
    pub fn position(&self) -> u64 {
        match self {
            StarRow::Core(row) => row.position,
            StarRow::Extension(row) => row.position,
        }
    }

    /// The row's join key: id for core rows, coreid for extension rows.
    pub fn join_key(&self) -> Option<&str> {
        match self {
            StarRow::Core(row) => row.id.as_deref(),
            StarRow::Extension(row) => Some(&row.core_id),
        }
    }

    /// Term data of the row.
    pub fn data(&self) -> &RowData {
        match self {
            StarRow::Core(row) => &row.data,
            StarRow::Extension(row) => &row.data,
        }
    }
}

/// Lazy joined iteration, obtained from
/// [`ArchiveReader::star_records`](crate::ArchiveReader::star_records).
///
/// Keys are visited in ascending order; within a key, combinations follow
/// the cross product of the participating files' ascending position lists,
/// with the last selected file varying fastest. Each item is one
/// combination, holding one row per participating file in selection order.
pub struct StarRecords<'a> {
    files: Vec<&'a mut DataFile>,
    keys: std::vec::IntoIter<String>,
    current: Option<KeyState>,
}

struct KeyState {
    /// `(index into files, ascending positions)` for the files carrying
    /// the current key.
    participants: Vec<(usize, Vec<u64>)>,
    odometer: Vec<usize>,
    exhausted: bool,
}

impl KeyState {
    fn next_combo(&mut self) -> Option<Vec<(usize, u64)>> {
        if self.exhausted {
            return None;
        }
        let combo = self
            .participants
            .iter()
            .zip(&self.odometer)
            .map(|((file_index, positions), i)| (*file_index, positions[*i]))
            .collect();

        // Advance, last file varying fastest.
        for slot in (0..self.odometer.len()).rev() {
            self.odometer[slot] += 1;
            if self.odometer[slot] < self.participants[slot].1.len() {
                return Some(combo);
            }
            self.odometer[slot] = 0;
        }
        self.exhausted = true;
        Some(combo)
    }
}

impl<'a> StarRecords<'a> {
    pub(crate) fn new(mut files: Vec<&'a mut DataFile>, join: JoinKind) -> Result<Self> {
        let mut keys: Option<FxHashSet<String>> = None;
        for file in files.iter_mut() {
            let file_keys = file.identifier_map()?;
            keys = Some(match keys {
                None => file_keys.keys().cloned().collect(),
                Some(mut acc) => {
                    match join {
                        JoinKind::Inner => acc.retain(|key| file_keys.contains_key(key)),
                        JoinKind::Outer => acc.extend(file_keys.keys().cloned()),
                    }
                    acc
                }
            });
        }

        // Sorted keys keep the iteration order deterministic.
        let mut keys: Vec<String> = keys.unwrap_or_default().into_iter().collect();
        keys.sort();

        Ok(Self {
            files,
            keys: keys.into_iter(),
            current: None,
        })
    }

    fn state_for(&mut self, key: &str) -> Result<Option<KeyState>> {
        let mut participants = Vec::new();
        for (file_index, file) in self.files.iter_mut().enumerate() {
            let positions = file.positions_for_id(key)?;
            if !positions.is_empty() {
                participants.push((file_index, positions));
            }
        }
        if participants.is_empty() {
            return Ok(None);
        }
        let odometer = vec![0; participants.len()];
        Ok(Some(KeyState {
            participants,
            odometer,
            exhausted: false,
        }))
    }

    fn parse(&mut self, combo: Vec<(usize, u64)>) -> Result<Vec<StarRow>> {
        combo
            .into_iter()
            .map(|(file_index, position)| {
                let file = &mut self.files[file_index];
                if file.is_core() {
                    file.core_row_at(position).map(StarRow::Core)
                } else {
                    file.extension_row_at(position).map(StarRow::Extension)
                }
            })
            .collect()
    }
}

impl Iterator for StarRecords<'_> {
    type Item = Result<Vec<StarRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let combo = self.current.as_mut().and_then(|state| state.next_combo());
            if let Some(combo) = combo {
                return Some(self.parse(combo));
            }
            self.current = None;

            let key = self.keys.next()?;
            match self.state_for(&key) {
                Ok(state) => self.current = state,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
