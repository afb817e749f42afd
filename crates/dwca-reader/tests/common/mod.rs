#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const NAME_TERM: &str = "http://rs.tdwg.org/dwc/terms/scientificName";
pub const COUNTRY_TERM: &str = "http://rs.tdwg.org/dwc/terms/country";
pub const DATASET_ID_TERM: &str = "http://rs.tdwg.org/dwc/terms/datasetID";
pub const DESCRIPTION_TERM: &str = "http://purl.org/dc/terms/description";
pub const VERNACULAR_TERM: &str = "http://rs.gbif.org/terms/1.0/vernacularName";

pub fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = File::create(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

pub const STAR_META: &str = r#"<archive xmlns="http://rs.tdwg.org/dwc/text/">
  <core encoding="utf-8" fieldsTerminatedBy="\t" linesTerminatedBy="\n"
        ignoreHeaderLines="1" rowType="http://rs.tdwg.org/dwc/terms/Occurrence">
    <files><location>occurrence.txt</location></files>
    <id index="0"/>
    <field index="1" term="http://rs.tdwg.org/dwc/terms/scientificName"/>
    <field term="http://rs.tdwg.org/dwc/terms/country" default="Belgium"/>
  </core>
  <extension encoding="utf-8" fieldsTerminatedBy="\t" linesTerminatedBy="\n"
             rowType="http://rs.gbif.org/terms/1.0/Description">
    <files><location>description.txt</location></files>
    <coreid index="0"/>
    <field index="1" term="http://purl.org/dc/terms/description"/>
  </extension>
  <extension encoding="utf-8" fieldsTerminatedBy="\t" linesTerminatedBy="\n"
             rowType="http://rs.gbif.org/terms/1.0/VernacularName">
    <files><location>vernacularname.txt</location></files>
    <coreid index="0"/>
    <field index="1" term="http://rs.gbif.org/terms/1.0/vernacularName"/>
  </extension>
</archive>
"#;

/// A directory archive with one core file (duplicate ids included) and two
/// extension files carrying both joined and orphaned rows.
pub fn build_star_archive(dir: &Path) {
    write_file(dir, "meta.xml", STAR_META);
    write_file(
        dir,
        "occurrence.txt",
        "id\tscientificName\n\
         1\taa\n\
         1\tbb\n\
         2\tcc\n\
         3\tdd\n\
         4\tee\n",
    );
    // Rows with coreid 1 sit at positions 0, 2 and 4; coreids 5 and 6
    // reference no core row.
    write_file(
        dir,
        "description.txt",
        "1\tfirst about one\n\
         2\tabout two\n\
         1\tsecond about one\n\
         5\torphan a\n\
         1\tthird about one\n\
         6\torphan b\n",
    );
    write_file(
        dir,
        "vernacularname.txt",
        "1\tpuffer\n\
         7\torphan c\n\
         2\tcow\n",
    );
}
