use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::debug;

use crate::error::KVError;
use crate::table::ConfigTable;

/// BackupSink stores a copy of a configuration table before it is
/// overwritten.
pub trait BackupSink: Send + Sync {
    /// Write a backup of `table` for `owner`. Returns where it was written.
    fn backup(&self, owner: &str, table: &ConfigTable, saved_at: &str) -> Result<PathBuf, KVError>;
}

/// Discards backups. Used when no scratch directory is configured.
pub struct NullBackupSink;

impl BackupSink for NullBackupSink {
    fn backup(&self, _owner: &str, _table: &ConfigTable, _saved_at: &str) -> Result<PathBuf, KVError> {
        Ok(PathBuf::new())
    }
}

/// FileBackupSink writes each backup as an XML document into a scratch
/// directory:
///
/// ```text
/// temp/
/// ├── aliceQWERTYUIOPASDFGHJKL.xml
/// └── aliceZXCVBNMQWERTYUIOPAS.xml
/// ```
///
/// File names are `{owner}{random suffix}.xml`; the directory is created on
/// first use. Characters of `owner` outside `[A-Za-z0-9._@-]` become `_`, so
/// a backup always lands directly in the scratch directory.
pub struct FileBackupSink {
    dir: PathBuf,
    suffix_len: usize,
}

impl FileBackupSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            suffix_len: 20,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn random_suffix(&self) -> String {
        let mut rng = rand::rng();
        (0..self.suffix_len)
            .map(|_| rng.random_range(b'A'..=b'Z') as char)
            .collect()
    }
}

impl BackupSink for FileBackupSink {
    fn backup(&self, owner: &str, table: &ConfigTable, saved_at: &str) -> Result<PathBuf, KVError> {
        fs::create_dir_all(&self.dir)?;

        let path = self
            .dir
            .join(format!("{}{}.xml", file_stem(owner), self.random_suffix()));
        fs::write(&path, to_xml(table, saved_at))?;

        debug!("FileBackupSink: wrote {:?} ({} rows)", path, table.rows.len());
        Ok(path)
    }
}

fn file_stem(owner: &str) -> String {
    owner
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '@' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Render a table as an XML document.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <ConfigTable name="alice_ABC" owner="alice" saved="2016-01-01T00:00:00+00:00">
///   <Row address="/Description/Model">LB3000</Row>
/// </ConfigTable>
/// ```
pub fn to_xml(table: &ConfigTable, saved_at: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<ConfigTable name=\"{}\" owner=\"{}\" saved=\"{}\">\n",
        escape(&table.name),
        escape(&table.owner),
        escape(saved_at),
    ));

    for row in &table.rows {
        if row.attributes.is_empty() {
            out.push_str(&format!(
                "  <Row address=\"{}\">{}</Row>\n",
                escape(&row.address),
                escape(&row.value),
            ));
            continue;
        }

        out.push_str(&format!("  <Row address=\"{}\">\n", escape(&row.address)));
        out.push_str(&format!("    <Value>{}</Value>\n", escape(&row.value)));
        for (key, value) in &row.attributes {
            out.push_str(&format!(
                "    <Attribute name=\"{}\">{}</Attribute>\n",
                escape(key),
                escape(value),
            ));
        }
        out.push_str("  </Row>\n");
    }

    out.push_str("</ConfigTable>\n");
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableRow;

    fn sample() -> ConfigTable {
        ConfigTable::with_rows(
            "alice_ABC",
            "alice",
            vec![
                TableRow::new("/Description/Model", "LB<3000>"),
                TableRow::new("/Agent/Address", "10.0.0.5").with_attribute("port", "5000"),
            ],
        )
    }

    #[test]
    fn xml_escapes_and_nests_attributes() {
        let xml = to_xml(&sample(), "2016-01-01T00:00:00+00:00");
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<ConfigTable name=\"alice_ABC\" owner=\"alice\""));
        assert!(xml.contains("<Row address=\"/Description/Model\">LB&lt;3000&gt;</Row>"));
        assert!(xml.contains("<Value>10.0.0.5</Value>"));
        assert!(xml.contains("<Attribute name=\"port\">5000</Attribute>"));
        assert!(xml.trim_end().ends_with("</ConfigTable>"));
    }

    #[test]
    fn file_sink_writes_owner_prefixed_xml() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileBackupSink::new(dir.path().join("temp"));

        let path = sink.backup("alice", &sample(), "now").unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("alice"));
        assert!(name.ends_with(".xml"));
        assert_eq!(name.len(), "alice".len() + 20 + ".xml".len());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("saved=\"now\""));
    }

    #[test]
    fn file_sink_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileBackupSink::new(dir.path());
        let a = sink.backup("bob", &sample(), "t1").unwrap();
        let b = sink.backup("bob", &sample(), "t2").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn file_sink_keeps_hostile_owner_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("temp");
        let sink = FileBackupSink::new(&scratch);

        for owner in ["../escape", "a/b", "..\\win", "/abs"] {
            let path = sink.backup(owner, &sample(), "now").unwrap();
            assert_eq!(path.parent(), Some(scratch.as_path()));
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(!name.contains('/') && !name.contains('\\'));
        }
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 4);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let path = sink.backup("../escape", &sample(), "now").unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".._escape"));
    }

    #[test]
    fn file_sink_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("temp");
        fs::write(&blocker, b"x").unwrap();

        let sink = FileBackupSink::new(&blocker);
        let err = sink.backup("alice", &sample(), "now").unwrap_err();
        assert!(matches!(err, KVError::Io(_)));
    }
}
