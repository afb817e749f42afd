mod common;

use common::*;
use dwca_reader::{ArchiveReader, Error};

#[test]
fn iterate_matches_random_access() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    let rows: Vec<_> = archive
        .iterate()
        .unwrap()
        .collect::<dwca_reader::Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(archive.row_count().unwrap(), 5);

    for (p, row) in rows.iter().enumerate() {
        assert_eq!(row.position, p as u64);
        let by_position = archive.get_row_by_position(p as u64).unwrap();
        assert_eq!(&by_position, row);
    }
    assert!(matches!(
        archive.get_row_by_position(5),
        Err(Error::RowNotFound)
    ));
}

#[test]
fn iteration_is_restartable() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    let first_pass = archive.iterate().unwrap().count();
    let second_pass = archive.iterate().unwrap().count();
    assert_eq!(first_pass, 5);
    assert_eq!(second_pass, 5);
}

#[test]
fn default_value_applies_to_every_row() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    for row in archive.iterate().unwrap() {
        let row = row.unwrap();
        assert_eq!(row.data.get(COUNTRY_TERM), Some("Belgium"));
    }
    assert!(archive.core_contains_term(COUNTRY_TERM).unwrap());
    assert!(!archive.core_contains_term("http://example.org/nope").unwrap());
}

#[test]
fn duplicate_ids_resolve_to_first_occurrence() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    let row = archive.get_row_by_id("1").unwrap();
    assert_eq!(row.position, 0);
    assert_eq!(row.data.get(NAME_TERM), Some("aa"));

    assert!(matches!(archive.get_row_by_id("9"), Err(Error::RowNotFound)));
}

#[test]
fn quoted_field_keeps_the_delimiter() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "meta.xml",
        r#"<archive xmlns="http://rs.tdwg.org/dwc/text/">
          <core encoding="utf-8" fieldsTerminatedBy="," linesTerminatedBy="\n"
                fieldsEnclosedBy='"' rowType="http://rs.tdwg.org/dwc/terms/Occurrence">
            <files><location>core.csv</location></files>
            <id index="0"/>
            <field index="1" term="http://rs.tdwg.org/dwc/terms/locality"/>
          </core>
        </archive>"#,
    );
    write_file(dir.path(), "core.csv", "1,\"Brussels, Belgium\"\n2,Gent\n");
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    let row = archive.get_row_by_position(0).unwrap();
    assert_eq!(
        row.data.get("http://rs.tdwg.org/dwc/terms/locality"),
        Some("Brussels, Belgium")
    );
    assert_eq!(archive.row_count().unwrap(), 2);
}

#[test]
fn use_after_close_fails_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    let mut archive = ArchiveReader::open(dir.path()).unwrap();
    assert_eq!(archive.get_row_by_position(0).unwrap().position, 0);

    archive.close().unwrap();
    // Idempotent.
    archive.close().unwrap();

    assert!(matches!(archive.iterate(), Err(Error::Closed)));
    assert!(matches!(archive.rows_all(), Err(Error::Closed)));
    assert!(matches!(archive.get_row_by_position(0), Err(Error::Closed)));
    assert!(matches!(archive.get_row_by_id("1"), Err(Error::Closed)));
    assert!(matches!(archive.row_count(), Err(Error::Closed)));
    assert!(matches!(archive.extensions_for("1"), Err(Error::Closed)));
    assert!(matches!(
        archive.orphaned_extension_rows(),
        Err(Error::Closed)
    ));
    assert!(matches!(archive.metadata(), Err(Error::Closed)));
    assert!(matches!(archive.descriptor(), Err(Error::Closed)));
    assert!(matches!(
        archive.descriptor_for("occurrence.txt"),
        Err(Error::Closed)
    ));
    assert!(matches!(
        archive.open_included_file("occurrence.txt"),
        Err(Error::Closed)
    ));
}

#[test]
fn simple_archive_without_metafile() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "whatever.csv",
        "id,scientificName\n1,tetraodon\n2,bufo\n",
    );
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    assert_eq!(archive.core_location().unwrap(), "whatever.csv");
    let rows = archive.rows_all().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].data.get("scientificName"), Some("tetraodon"));
    assert_eq!(rows[0].rowtype, None);
    assert!(!archive.uses_extensions().unwrap());
}

#[test]
fn simple_archive_tolerates_a_metadata_file() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "data.csv", "id,scientificName\n1,tetraodon\n");
    write_file(dir.path(), "EML.xml", "<eml><dataset/></eml>");
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    assert_eq!(archive.core_location().unwrap(), "data.csv");
    assert!(archive.metadata().unwrap().unwrap().contains("<dataset/>"));
    assert_eq!(archive.rows_all().unwrap().len(), 1);
}

#[test]
fn simple_archive_with_extra_files_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.csv", "id\n1\n");
    write_file(dir.path(), "b.csv", "id\n1\n");
    write_file(dir.path(), "c.csv", "id\n1\n");
    assert!(matches!(
        ArchiveReader::open(dir.path()),
        Err(Error::InvalidArchive(_))
    ));
}

#[test]
fn referenced_datafile_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    std::fs::remove_file(dir.path().join("description.txt")).unwrap();
    assert!(matches!(
        ArchiveReader::open(dir.path()),
        Err(Error::InvalidArchive(_))
    ));
}

#[test]
fn declared_metadata_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "meta.xml",
        r#"<archive metadata="eml.xml">
          <core><files><location>core.txt</location></files><id index="0"/></core>
        </archive>"#,
    );
    write_file(dir.path(), "core.txt", "1\n");
    assert!(matches!(
        ArchiveReader::open(dir.path()),
        Err(Error::InvalidArchive(_))
    ));
}

#[test]
fn undeclared_members_are_pass_through_only() {
    let dir = tempfile::tempdir().unwrap();
    build_star_archive(dir.path());
    write_file(dir.path(), "citations.txt", "please cite this");
    let archive = ArchiveReader::open(dir.path()).unwrap();

    assert!(matches!(
        archive.descriptor_for("citations.txt"),
        Err(Error::NotADataFile(_))
    ));
    let mut content = String::new();
    use std::io::Read;
    archive
        .open_included_file("citations.txt")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "please cite this");

    // Declared files do have a descriptor.
    let descriptor = archive.descriptor_for("description.txt").unwrap();
    assert_eq!(descriptor.coreid_index, Some(0));
}

#[test]
fn source_metadata_links_rows_by_dataset_id() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "meta.xml",
        r#"<archive xmlns="http://rs.tdwg.org/dwc/text/">
          <core encoding="utf-8" fieldsTerminatedBy="\t" linesTerminatedBy="\n"
                rowType="http://rs.tdwg.org/dwc/terms/Occurrence">
            <files><location>occurrence.txt</location></files>
            <id index="0"/>
            <field index="1" term="http://rs.tdwg.org/dwc/terms/datasetID"/>
          </core>
        </archive>"#,
    );
    write_file(
        dir.path(),
        "occurrence.txt",
        "1\tuuid-a\n2\tuuid-b\n3\tuuid-missing\n",
    );
    write_file(dir.path(), "dataset/uuid-a.xml", "<eml>dataset a</eml>");
    write_file(dir.path(), "dataset/uuid-b.xml", "<eml>dataset b</eml>");
    let mut archive = ArchiveReader::open(dir.path()).unwrap();

    assert_eq!(archive.source_metadata().unwrap().len(), 2);

    let row = archive.get_row_by_position(0).unwrap();
    assert!(row.source_metadata.as_deref().unwrap().contains("dataset a"));
    let row = archive.get_row_by_position(1).unwrap();
    assert!(row.source_metadata.as_deref().unwrap().contains("dataset b"));
    // Unresolved dataset ids yield no document.
    let row = archive.get_row_by_position(2).unwrap();
    assert!(row.source_metadata.is_none());
}
