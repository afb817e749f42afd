//! Parsed-row entities produced by the data file engine.
//!
//! [`CoreRow`] and [`ExtensionRow`] are two concrete shapes sharing the same
//! capability set (position, rowtype, ordered term data) plus their
//! variant-specific identifier. Values are never type-converted: everything
//! stays text, interpretation is a caller concern.

use std::sync::Arc;

use crate::descriptor::FileDescriptor;
use crate::error::{Error, Result};

/// Ordered mapping from term URI to text value.
///
/// Field order follows the descriptor's field list. Lookups are linear,
/// which is fine for the few dozen terms a data file declares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowData(Vec<(Arc<str>, String)>);

impl RowData {
    /// Value for `term`, if the row carries it.
    pub fn get(&self, term: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(t, _)| t.as_ref() == term)
            .map(|(_, v)| v.as_str())
    }

    /// Terms and values in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(t, v)| (t.as_ref(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, term: &Arc<str>, value: String) {
        // A term declared twice keeps its first slot, last value wins.
        match self.0.iter_mut().find(|(t, _)| t == term) {
            Some((_, v)) => *v = value,
            None => self.0.push((Arc::clone(term), value)),
        }
    }
}

/// A row from the core data file.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreRow {
    /// Stable 0-based position in the core file, header lines excluded.
    pub position: u64,
    /// Row type URI from the metafile, `None` for sniffed archives.
    pub rowtype: Option<Arc<str>>,
    /// Value of the id column. Not guaranteed unique by the format, and
    /// absent when the archive declares no id column.
    pub id: Option<String>,
    /// Term data.
    pub data: RowData,
    /// Source metadata document for the row's dataset, when the archive
    /// carries one (shared, not copied per row).
    pub source_metadata: Option<Arc<str>>,
}

/// A row from an extension data file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionRow {
    /// Stable 0-based position in its extension file.
    pub position: u64,
    /// Row type URI from the metafile.
    pub rowtype: Option<Arc<str>>,
    /// Join key: the id of the core row this row extends.
    pub core_id: String,
    /// Term data.
    pub data: RowData,
}

impl CoreRow {
    pub(crate) fn parse(line: &str, position: u64, descriptor: &FileDescriptor) -> Result<Self> {
        let raw = split_fields(
            line,
            &descriptor.dialect.fields_terminated_by,
            descriptor.dialect.fields_enclosed_by,
        );
        let id = match descriptor.id_index {
            Some(index) => Some(column_value(&raw, index, position)?.to_string()),
            None => None,
        };
        Ok(Self {
            position,
            rowtype: descriptor.rowtype.clone(),
            id,
            data: build_data(&raw, descriptor, position)?,
            source_metadata: None,
        })
    }
}

impl ExtensionRow {
    pub(crate) fn parse(line: &str, position: u64, descriptor: &FileDescriptor) -> Result<Self> {
        let raw = split_fields(
            line,
            &descriptor.dialect.fields_terminated_by,
            descriptor.dialect.fields_enclosed_by,
        );
        let coreid_index = descriptor.coreid_index.ok_or_else(|| {
            Error::InvalidArchive(format!(
                "{} declares no coreid column",
                descriptor.location
            ))
        })?;
        Ok(Self {
            position,
            rowtype: descriptor.rowtype.clone(),
            core_id: column_value(&raw, coreid_index, position)?.to_string(),
            data: build_data(&raw, descriptor, position)?,
        })
    }
}

fn column_value(raw: &[String], index: usize, position: u64) -> Result<&str> {
    raw.get(index).map(String::as_str).ok_or_else(|| {
        Error::InvalidArchive(format!(
            "the descriptor references a non-existent column (index {index}) at row {position}"
        ))
    })
}

fn build_data(raw: &[String], descriptor: &FileDescriptor, position: u64) -> Result<RowData> {
    let mut data = RowData::default();
    for field in &descriptor.fields {
        let value = match field.index {
            Some(index) => {
                let physical = column_value(raw, index, position)?;
                if physical.is_empty() {
                    // Empty physical value falls back to the default.
                    field.default.clone().unwrap_or_default()
                } else {
                    physical.to_string()
                }
            }
            // Default-only fields never read the line.
            None => field.default.clone().unwrap_or_default(),
        };
        data.insert(&field.term, value);
    }
    Ok(data)
}

/// Split one record into fields, honoring the delimiter and the optional
/// enclosure character.
///
/// Inside an enclosure, delimiters and line terminators are literal; a
/// doubled enclosure character decodes to one literal occurrence. The
/// record must already be stripped of its terminator.
pub(crate) fn split_fields(record: &str, delimiter: &str, quote: Option<char>) -> Vec<String> {
    let Some(quote) = quote else {
        return record.split(delimiter).map(str::to_string).collect();
    };

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut rest = record;

    while let Some(c) = rest.chars().next() {
        if c == quote {
            let after = &rest[c.len_utf8()..];
            if in_quotes && after.starts_with(quote) {
                // Doubled enclosure inside a quoted field.
                current.push(quote);
                rest = &after[quote.len_utf8()..];
            } else {
                in_quotes = !in_quotes;
                rest = after;
            }
            continue;
        }
        if !in_quotes && rest.starts_with(delimiter) {
            fields.push(std::mem::take(&mut current));
            rest = &rest[delimiter.len()..];
            continue;
        }
        current.push(c);
        rest = &rest[c.len_utf8()..];
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Dialect, Field};

    fn descriptor_with(fields: Vec<Field>, id_index: Option<usize>) -> FileDescriptor {
        FileDescriptor {
            location: "core.txt".to_string(),
            rowtype: Some(Arc::from("http://rs.tdwg.org/dwc/terms/Occurrence")),
            is_core: true,
            id_index,
            coreid_index: None,
            dialect: Dialect::default(),
            fields,
        }
    }

    fn field(term: &str, index: Option<usize>, default: Option<&str>) -> Field {
        Field {
            term: Arc::from(term),
            index,
            default: default.map(str::to_string),
        }
    }

    #[test]
    fn splits_unquoted_fields() {
        assert_eq!(split_fields("a\tb\tc", "\t", None), vec!["a", "b", "c"]);
        assert_eq!(split_fields("a\t\tc", "\t", None), vec!["a", "", "c"]);
        assert_eq!(split_fields("", "\t", None), vec![""]);
    }

    #[test]
    fn quoted_field_keeps_delimiter_verbatim() {
        assert_eq!(
            split_fields(r#"1,"a, b",c"#, ",", Some('"')),
            vec!["1", "a, b", "c"]
        );
    }

    #[test]
    fn quoted_field_keeps_line_terminator_verbatim() {
        assert_eq!(
            split_fields("1,\"a\nb\",c", ",", Some('"')),
            vec!["1", "a\nb", "c"]
        );
    }

    #[test]
    fn doubled_quote_decodes_to_literal_quote() {
        assert_eq!(
            split_fields(r#""say ""hi""",x"#, ",", Some('"')),
            vec![r#"say "hi""#, "x"]
        );
    }

    #[test]
    fn default_field_never_reads_the_line() {
        let descriptor = descriptor_with(
            vec![
                field("http://example.org/name", Some(1), None),
                field("http://example.org/country", None, Some("Belgium")),
            ],
            Some(0),
        );
        let row = CoreRow::parse("7\ttetraodon", 0, &descriptor).unwrap();
        assert_eq!(row.id.as_deref(), Some("7"));
        assert_eq!(row.data.get("http://example.org/name"), Some("tetraodon"));
        assert_eq!(row.data.get("http://example.org/country"), Some("Belgium"));
    }

    #[test]
    fn empty_value_falls_back_to_default_then_empty() {
        let descriptor = descriptor_with(
            vec![
                field("http://example.org/a", Some(0), Some("dflt")),
                field("http://example.org/b", Some(1), None),
            ],
            None,
        );
        let row = CoreRow::parse("\t", 0, &descriptor).unwrap();
        assert_eq!(row.data.get("http://example.org/a"), Some("dflt"));
        assert_eq!(row.data.get("http://example.org/b"), Some(""));
    }

    #[test]
    fn out_of_bounds_column_index_is_invalid() {
        let descriptor = descriptor_with(vec![field("http://example.org/a", Some(5), None)], None);
        let err = CoreRow::parse("only\ttwo", 0, &descriptor).unwrap_err();
        assert!(matches!(err, Error::InvalidArchive(_)));
    }

    #[test]
    fn extension_row_extracts_the_join_key() {
        let descriptor = FileDescriptor {
            location: "description.txt".to_string(),
            rowtype: None,
            is_core: false,
            id_index: None,
            coreid_index: Some(0),
            dialect: Dialect::default(),
            fields: vec![field("http://example.org/text", Some(1), None)],
        };
        let row = ExtensionRow::parse("c1\tsome text", 4, &descriptor).unwrap();
        assert_eq!(row.core_id, "c1");
        assert_eq!(row.position, 4);
    }
}
