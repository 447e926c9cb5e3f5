//! Persisted device-id assignments (`<entity>/.genid`).
//!
//! The table is nested JSON keyed by the identity path a device id was
//! generated for, e.g. `{"device": {"nscan": {"10.0.0.1": "<uuid>"}}}`.
//! Rebuilding a database with the same table yields the same ids.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nscandb_builder::IdGenerator;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::CacheError;

pub const GENID_FILE: &str = ".genid";

#[derive(Debug)]
pub struct GenIds {
    path: PathBuf,
    table: Map<String, Value>,
    dirty: bool,
}

impl GenIds {
    /// Load the table at `path`. A missing file starts an empty table, any
    /// other failure is logged and also starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    error!(path = %path.display(), "genid table is not an object");
                    Map::new()
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "cannot parse genid table");
                    Map::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => {
                error!(path = %path.display(), error = %err, "cannot read genid table");
                Map::new()
            }
        };
        Self {
            path,
            table,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The id stored under `path`, if any.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        let (last, parents) = path.split_last()?;
        let mut map = &self.table;
        for seg in parents {
            map = map.get(seg.as_ref())?.as_object()?;
        }
        map.get(last.as_ref())?.as_str()
    }

    /// The id stored under `path`, assigning a fresh UUID when there is none.
    pub fn get_or_assign<S: AsRef<str>>(&mut self, path: &[S]) -> String {
        if let Some(id) = self.get(path) {
            return id.to_string();
        }
        let id = Uuid::new_v4().to_string();
        let Some((last, parents)) = path.split_last() else {
            return id;
        };
        let mut map = &mut self.table;
        for seg in parents {
            let slot = map
                .entry(seg.as_ref().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                warn!(path = %self.path.display(), segment = seg.as_ref(), "replacing non-object genid node");
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else {
                return id;
            };
            map = next;
        }
        map.insert(last.as_ref().to_string(), Value::String(id.clone()));
        self.dirty = true;
        id
    }

    /// Write the table back if anything was assigned since the last save.
    pub fn save(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        let text = serde_json::to_string(&self.table).map_err(|err| CacheError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(|err| CacheError::io(&tmp, err))?;
        fs::rename(&tmp, &self.path).map_err(|err| CacheError::io(&self.path, err))?;
        debug!(path = %self.path.display(), "genid table saved");
        self.dirty = false;
        Ok(())
    }
}

/// Id generator handed to the builder, backed by a shared table.
#[derive(Debug, Clone)]
pub struct GenIdAllocator(Arc<Mutex<GenIds>>);

impl GenIdAllocator {
    pub fn new(table: Arc<Mutex<GenIds>>) -> Self {
        Self(table)
    }
}

impl IdGenerator for GenIdAllocator {
    fn generate(&mut self, path: &[String]) -> String {
        self.0.lock().get_or_assign(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn assigns_once_per_path() {
        let dir = tempdir().unwrap();
        let mut ids = GenIds::load(dir.path().join(GENID_FILE));
        let a = ids.get_or_assign(&["device", "nscan", "10.0.0.1"]);
        let b = ids.get_or_assign(&["device", "nscan", "10.0.0.1"]);
        let c = ids.get_or_assign(&["device", "nscan", "10.0.0.2"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(ids.is_dirty());
    }

    #[test]
    fn survives_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(GENID_FILE);
        let mut ids = GenIds::load(&path);
        let a = ids.get_or_assign(&["device", "arp", "aa:bb:cc:00:00:01"]);
        ids.save().unwrap();
        assert!(!ids.is_dirty());

        let text = fs::read_to_string(&path).unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["device"]["arp"]["aa:bb:cc:00:00:01"], Value::String(a.clone()));

        let reloaded = GenIds::load(&path);
        assert_eq!(reloaded.get(&["device", "arp", "aa:bb:cc:00:00:01"]), Some(a.as_str()));
    }

    #[test]
    fn unreadable_table_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(GENID_FILE);
        fs::write(&path, "not json").unwrap();
        let mut ids = GenIds::load(&path);
        assert!(ids.get(&["device", "nscan", "x"]).is_none());
        ids.get_or_assign(&["device", "nscan", "x"]);
        assert!(ids.get(&["device", "nscan", "x"]).is_some());
    }

    #[test]
    fn clean_table_is_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(GENID_FILE);
        let mut ids = GenIds::load(&path);
        ids.save().unwrap();
        assert!(!path.exists());
    }
}
