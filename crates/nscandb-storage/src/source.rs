//! Source dumps and the parser that turns them into tables.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use nscandb_builder::Ndb;
use serde_json::Value;

use crate::error::CacheError;

pub const PLAIN_SUFFIX: &str = ".nscan";
pub const GZIP_SUFFIX: &str = ".nscan.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Plain,
    Gzip,
}

/// A dump file selected for a database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl Source {
    /// Probe `<dir>/<id>.nscan`, then `<dir>/<id>.nscan.gz`.
    pub fn find(dir: &Path, id: &str) -> Option<Source> {
        [(PLAIN_SUFFIX, SourceKind::Plain), (GZIP_SUFFIX, SourceKind::Gzip)]
            .into_iter()
            .map(|(suffix, kind)| Source {
                path: dir.join(format!("{id}{suffix}")),
                kind,
            })
            .find(|source| source.path.is_file())
    }

    pub fn open(&self) -> Result<Box<dyn BufRead + Send>, CacheError> {
        let file = File::open(&self.path).map_err(|err| CacheError::io(&self.path, err))?;
        Ok(match self.kind {
            SourceKind::Plain => Box::new(BufReader::new(file)),
            SourceKind::Gzip => Box::new(BufReader::new(GzDecoder::new(file))),
        })
    }
}

/// Database id of a source file name, if it names one.
pub fn db_id(file_name: &str) -> Option<&str> {
    if file_name.starts_with('.') {
        return None;
    }
    let id = file_name
        .strip_suffix(GZIP_SUFFIX)
        .or_else(|| file_name.strip_suffix(PLAIN_SUFFIX))?;
    (!id.is_empty()).then_some(id)
}

/// Turns a source dump into parsed tables.
pub trait NdbParser: Send + Sync {
    fn parse(&self, source: &Source, reader: &mut dyn BufRead) -> Result<Ndb, CacheError>;
}

/// Reads dumps that already hold the parsed table structure as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonNdbParser;

impl NdbParser for JsonNdbParser {
    fn parse(&self, source: &Source, reader: &mut dyn BufRead) -> Result<Ndb, CacheError> {
        let parse_error = |message: String| CacheError::Parse {
            path: source.path.clone(),
            message,
        };
        match serde_json::from_reader::<_, Value>(reader) {
            Ok(Value::Object(tables)) => Ok(tables),
            Ok(_) => Err(parse_error("expected an object of tables".to_string())),
            Err(err) if err.is_io() => Err(CacheError::Io {
                path: source.path.clone(),
                source: err.into(),
            }),
            Err(err) => Err(parse_error(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn file_names_map_to_ids() {
        assert_eq!(db_id("2024-01-01.nscan"), Some("2024-01-01"));
        assert_eq!(db_id("2024-01-01.nscan.gz"), Some("2024-01-01"));
        assert_eq!(db_id(".genid"), None);
        assert_eq!(db_id(".hidden.nscan"), None);
        assert_eq!(db_id("notes.txt"), None);
        assert_eq!(db_id(".nscan"), None);
    }

    #[test]
    fn plain_source_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.nscan.gz"), b"").unwrap();
        assert_eq!(Source::find(dir.path(), "a").unwrap().kind, SourceKind::Gzip);
        std::fs::write(dir.path().join("a.nscan"), b"{}").unwrap();
        assert_eq!(Source::find(dir.path(), "a").unwrap().kind, SourceKind::Plain);
        assert!(Source::find(dir.path(), "b").is_none());
    }

    #[test]
    fn gzip_sources_are_decoded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.nscan.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(br#"{"x-snmp-sys": {}}"#).unwrap();
        enc.finish().unwrap();

        let source = Source::find(dir.path(), "a").unwrap();
        let mut reader = source.open().unwrap();
        let ndb = JsonNdbParser.parse(&source, &mut reader).unwrap();
        assert!(ndb.contains_key("x-snmp-sys"));
    }

    #[test]
    fn non_object_dump_is_a_parse_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.nscan"), b"[1, 2]").unwrap();
        let source = Source::find(dir.path(), "a").unwrap();
        let mut reader = source.open().unwrap();
        let err = JsonNdbParser.parse(&source, &mut reader).unwrap_err();
        assert!(matches!(err, CacheError::Parse { .. }));
    }
}
