//! Filesystem watchers that invalidate cached listings.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, warn};

use crate::Inner;

#[derive(Default)]
pub(crate) struct Watchers {
    root: Option<RecommendedWatcher>,
    entities: HashMap<String, RecommendedWatcher>,
}

impl Watchers {
    pub fn is_watching_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn is_watching(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }
}

/// A rename or removal of `path` itself.
fn moves_away(event: &Event, path: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    ) && event.paths.iter().any(|p| p == path)
}

fn spawn_watcher<F>(path: &Path, inner: Weak<Inner>, on_event: F) -> Option<RecommendedWatcher>
where
    F: Fn(&Inner, &Event) + Send + 'static,
{
    let shown = path.display().to_string();
    let handler = move |res: notify::Result<Event>| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match res {
            Ok(event) => on_event(&inner, &event),
            Err(err) => warn!(path = %shown, error = %err, "watch error"),
        }
    };
    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot create watcher");
            return None;
        }
    };
    if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
        warn!(path = %path.display(), error = %err, "cannot watch");
        return None;
    }
    debug!(path = %path.display(), "watching");
    Some(watcher)
}

impl Inner {
    pub(crate) fn watch_root(self: &Arc<Self>) {
        if !self.config.watch || self.watchers.lock().is_watching_root() {
            return;
        }
        let root = self.config.data_dir.clone();
        let Some(watcher) = spawn_watcher(&root, Arc::downgrade(self), |inner, event| {
            inner.on_root_event(event)
        }) else {
            return;
        };
        let mut watchers = self.watchers.lock();
        if watchers.root.is_none() {
            watchers.root = Some(watcher);
        }
    }

    pub(crate) fn watch_entity(self: &Arc<Self>, entity: &str) {
        if !self.config.watch || self.watchers.lock().is_watching(entity) {
            return;
        }
        let dir = self.config.data_dir.join(entity);
        if !dir.is_dir() {
            return;
        }
        let name = entity.to_string();
        let Some(watcher) = spawn_watcher(&dir, Arc::downgrade(self), move |inner, event| {
            inner.on_entity_event(&name, event)
        }) else {
            return;
        };
        self.watchers
            .lock()
            .entities
            .entry(entity.to_string())
            .or_insert(watcher);
    }

    pub(crate) fn on_root_event(&self, event: &Event) {
        let root = &self.config.data_dir;
        if moves_away(event, root) {
            error!(
                path = %root.display(),
                "data root renamed or removed, flushing cache and watchers"
            );
            self.flush();
            return;
        }
        debug!(kind = ?event.kind, "data root changed");
        *self.entities.lock() = None;
        for path in &event.paths {
            if path.parent() != Some(root.as_path()) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            self.db_lists.lock().remove(name);
            if moves_away(event, path) {
                self.watchers.lock().entities.remove(name);
            }
        }
    }

    pub(crate) fn on_entity_event(&self, entity: &str, event: &Event) {
        debug!(entity, kind = ?event.kind, "entity directory changed");
        self.db_lists.lock().remove(entity);
        if moves_away(event, &self.config.data_dir.join(entity)) {
            *self.entities.lock() = None;
            self.watchers.lock().entities.remove(entity);
        }
    }
}
