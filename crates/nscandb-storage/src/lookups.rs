//! OID-name and MAC-vendor reference files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info};

use crate::error::CacheError;

pub type LookupTable = HashMap<String, String>;

/// Read a JSON object of string values. Non-string values are skipped.
pub fn load_table(path: &Path) -> Result<LookupTable, CacheError> {
    let bytes = fs::read(path).map_err(|err| CacheError::io(path, err))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|err| CacheError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let Value::Object(map) = value else {
        return Err(CacheError::Parse {
            path: path.to_path_buf(),
            message: "expected an object".to_string(),
        });
    };
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect())
}

/// A lazily loaded lookup table, kept until cleared.
#[derive(Debug, Default)]
pub(crate) struct LazyTable {
    slot: Mutex<Option<Arc<LookupTable>>>,
}

impl LazyTable {
    pub fn get(&self, name: &str, path: Option<&Path>) -> Arc<LookupTable> {
        let mut slot = self.slot.lock();
        if let Some(table) = slot.as_ref() {
            return table.clone();
        }
        let table = match path {
            None => LookupTable::new(),
            Some(path) => match load_table(path) {
                Ok(table) => {
                    info!(table = name, entries = table.len(), path = %path.display(), "lookup table loaded");
                    table
                }
                Err(err) => {
                    error!(table = name, error = %err, "cannot load lookup table");
                    LookupTable::new()
                }
            },
        };
        let table = Arc::new(table);
        *slot = Some(table.clone());
        table
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
