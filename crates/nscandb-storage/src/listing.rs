//! Entity and database listings.

use std::fs;
use std::path::Path;

use crate::error::CacheError;
use crate::source::db_id;

/// Non-hidden subdirectories of the data root, sorted.
pub fn read_entities(root: &Path) -> Result<Vec<String>, CacheError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root).map_err(|err| CacheError::io(root, err))? {
        let entry = entry.map_err(|err| CacheError::io(root, err))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Database ids found in an entity directory, sorted and deduplicated.
pub fn read_db_ids(dir: &Path) -> Result<Vec<String>, CacheError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| CacheError::io(dir, err))? {
        let entry = entry.map_err(|err| CacheError::io(dir, err))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if let Some(id) = db_id(&name) {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Entity and database names are single, non-hidden path components.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}
