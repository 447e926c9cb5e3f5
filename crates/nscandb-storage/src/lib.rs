//! nscandb Database Cache
//!
//! Builds databases from per-entity scan dumps on demand and keeps them:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE CACHE                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  get_db(entity, id)                                                 │
//! │        │                                                            │
//! │        ▼                                                            │
//! │  ┌───────────┐ hit  ┌──────────────────┐                            │
//! │  │  cached?  │─────►│ Arc<Database>    │                            │
//! │  └───────────┘      └──────────────────┘                            │
//! │        │ miss               ▲                                       │
//! │        ▼                    │                                       │
//! │  ┌───────────┐  wait  ┌───────────┐                                 │
//! │  │ in flight?│───────►│  watch    │                                 │
//! │  └───────────┘        │  channel  │                                 │
//! │        │ lead         └───────────┘                                 │
//! │        ▼                    ▲                                       │
//! │  evict ─► <id>.nscan[.gz] ─► parser ─► builder ─► .genid            │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Single flight**: one build per `(entity, id)`, concurrent callers share it
//! - **Bounded**: least-recently-used and idle eviction, both optional
//! - **Stable ids**: device ids persisted per entity in `.genid`
//! - **Reactive listings**: entity and database lists refreshed on filesystem changes

pub mod error;
pub mod genid;
pub mod listing;
pub mod lookups;
pub mod source;
mod watch;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use nscandb_builder::{BuildOptions, Database, Registry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch as flight;
use tracing::{debug, error, info};

pub use error::CacheError;
pub use genid::{GenIdAllocator, GenIds};
pub use lookups::LookupTable;
pub use source::{JsonNdbParser, NdbParser, Source, SourceKind};

use lookups::LazyTable;
use watch::Watchers;

// ============================================================================
// Configuration
// ============================================================================

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory, one subdirectory per entity
    pub data_dir: PathBuf,
    /// Maximum number of cached databases
    pub db_max_count: Option<usize>,
    /// Evict databases unused for this many seconds
    pub db_max_idle_secs: Option<u64>,
    /// JSON object of OID → product name
    pub oid_file: Option<PathBuf>,
    /// JSON object of MAC prefix → vendor
    pub oui_file: Option<PathBuf>,
    /// Refresh listings on filesystem changes
    pub watch: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_max_count: None,
            db_max_idle_secs: None,
            oid_file: None,
            oui_file: None,
            watch: true,
        }
    }
}

impl CacheConfig {
    /// Read a JSON config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn db_max_idle(&self) -> Option<Duration> {
        self.db_max_idle_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Cache state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbKey {
    pub entity: String,
    pub id: String,
}

impl DbKey {
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.id)
    }
}

struct Cached {
    db: Arc<Database>,
    last_used: Instant,
    /// Recency order; `Instant`s can tie.
    tick: u64,
}

/// Result of a build, as seen by callers that waited for it.
#[derive(Clone)]
enum Outcome {
    Built(Arc<Database>),
    Missing,
    Failed(String),
}

type FlightRx = flight::Receiver<Option<Outcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub databases: usize,
    pub in_flight: usize,
    pub listings: usize,
}

pub(crate) struct Inner {
    config: CacheConfig,
    registry: Registry,
    parser: Arc<dyn NdbParser>,
    dbs: Mutex<HashMap<DbKey, Cached>>,
    inflight: Mutex<HashMap<DbKey, FlightRx>>,
    ticks: AtomicU64,
    entities: Mutex<Option<Arc<Vec<String>>>>,
    db_lists: Mutex<HashMap<String, Arc<Vec<String>>>>,
    genids: Mutex<HashMap<String, Arc<Mutex<GenIds>>>>,
    oui: LazyTable,
    oid: LazyTable,
    watchers: Mutex<Watchers>,
}

/// Removes the in-flight entry even when the leading caller is dropped
/// mid-build, so waiters can take over.
struct FlightGuard<'a> {
    inner: &'a Inner,
    key: &'a DbKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.inflight.lock().remove(self.key);
    }
}

enum Role {
    Hit(Arc<Database>),
    Leader(flight::Sender<Option<Outcome>>),
    Waiter(FlightRx),
}

// ============================================================================
// Cache manager
// ============================================================================

/// Shared handle to the database cache.
#[derive(Clone)]
pub struct DbCache {
    inner: Arc<Inner>,
}

impl DbCache {
    /// Cache with the standard builder pipeline and JSON dumps.
    pub fn new(config: CacheConfig) -> anyhow::Result<Self> {
        let registry = Registry::standard().context("registering builders")?;
        Ok(Self::from_parts(config, registry, Arc::new(JsonNdbParser)))
    }

    pub fn from_parts(config: CacheConfig, registry: Registry, parser: Arc<dyn NdbParser>) -> Self {
        info!(data_dir = %config.data_dir.display(), "database cache ready");
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                parser,
                dbs: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                ticks: AtomicU64::new(0),
                entities: Mutex::new(None),
                db_lists: Mutex::new(HashMap::new()),
                genids: Mutex::new(HashMap::new()),
                oui: LazyTable::default(),
                oid: LazyTable::default(),
                watchers: Mutex::new(Watchers::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The database `id` of `entity`, building it unless cached.
    ///
    /// `Ok(None)` when no source dump exists. With `force` a cached copy is
    /// rebuilt; a build already in flight is joined either way.
    pub async fn get_db(
        &self,
        entity: &str,
        id: &str,
        force: bool,
    ) -> Result<Option<Arc<Database>>, CacheError> {
        if !listing::is_valid_name(entity) || !listing::is_valid_name(id) {
            return Err(CacheError::NotFound {
                path: self.inner.config.data_dir.join(entity).join(id),
            });
        }
        let key = DbKey::new(entity, id);

        loop {
            match self.inner.elect(&key, force) {
                Role::Hit(db) => return Ok(Some(db)),
                Role::Waiter(rx) => {
                    debug!(db = %key, "waiting for build in flight");
                    match wait_outcome(rx).await {
                        Some(Outcome::Built(db)) => return Ok(Some(db)),
                        Some(Outcome::Missing) => return Ok(None),
                        Some(Outcome::Failed(message)) => {
                            return Err(CacheError::BuildFailed {
                                entity: key.entity.clone(),
                                id: key.id.clone(),
                                message,
                            })
                        }
                        // leader went away without a result
                        None => continue,
                    }
                }
                Role::Leader(tx) => {
                    let guard = FlightGuard {
                        inner: &self.inner,
                        key: &key,
                    };
                    let result = self.load(&key).await;
                    drop(guard);
                    let outcome = match &result {
                        Ok(Some(db)) => Outcome::Built(db.clone()),
                        Ok(None) => Outcome::Missing,
                        Err(err) => Outcome::Failed(err.to_string()),
                    };
                    let _ = tx.send(Some(outcome));
                    return result;
                }
            }
        }
    }

    async fn load(&self, key: &DbKey) -> Result<Option<Arc<Database>>, CacheError> {
        let dir = self.inner.config.data_dir.join(&key.entity);
        let Some(source) = Source::find(&dir, &key.id) else {
            debug!(db = %key, "no source");
            return Ok(None);
        };
        self.inner.evict_idle(key);

        let inner = self.inner.clone();
        let build_key = key.clone();
        let db = tokio::task::spawn_blocking(move || inner.build(&build_key, &source))
            .await
            .map_err(|err| CacheError::BuildFailed {
                entity: key.entity.clone(),
                id: key.id.clone(),
                message: err.to_string(),
            })??;

        let db = Arc::new(db);
        self.inner.admit(key.clone(), db.clone());
        Ok(Some(db))
    }

    /// Entity names, cached until the data root changes.
    pub fn entity_list(&self) -> Result<Arc<Vec<String>>, CacheError> {
        if let Some(list) = self.inner.entities.lock().clone() {
            return Ok(list);
        }
        self.inner.watch_root();
        let list = Arc::new(listing::read_entities(&self.inner.config.data_dir)?);
        *self.inner.entities.lock() = Some(list.clone());
        Ok(list)
    }

    /// Database ids of `entity`, cached until its directory changes.
    pub fn db_list(&self, entity: &str) -> Result<Arc<Vec<String>>, CacheError> {
        let dir = self.inner.config.data_dir.join(entity);
        if !listing::is_valid_name(entity) {
            return Err(CacheError::NotFound { path: dir });
        }
        if let Some(list) = self.inner.db_lists.lock().get(entity) {
            return Ok(list.clone());
        }
        self.inner.watch_entity(entity);
        let list = Arc::new(listing::read_db_ids(&dir)?);
        self.inner
            .db_lists
            .lock()
            .insert(entity.to_string(), list.clone());
        Ok(list)
    }

    /// MAC prefix → vendor table.
    pub fn oui_db(&self) -> Arc<LookupTable> {
        self.inner.oui_db()
    }

    /// OID → product name table.
    pub fn oid_db(&self) -> Arc<LookupTable> {
        self.inner.oid_db()
    }

    /// Drop every cached database, listing, genid and lookup table, and
    /// re-arm the data root watcher. Entity watchers return with the next
    /// `db_list` of each entity.
    pub fn reload(&self) {
        info!("reloading database cache");
        self.inner.flush();
        self.inner.oui.clear();
        self.inner.oid.clear();
        self.inner.watch_root();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

async fn wait_outcome(mut rx: FlightRx) -> Option<Outcome> {
    loop {
        let current = rx.borrow().clone();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

/// Remove least recently used entries other than `incoming` until it fits
/// within `max_count`.
fn evict_lru(dbs: &mut HashMap<DbKey, Cached>, incoming: &DbKey, max_count: usize) {
    loop {
        let others = dbs.keys().filter(|key| *key != incoming).count();
        if others < max_count {
            break;
        }
        let lru = dbs
            .iter()
            .filter(|(key, _)| *key != incoming)
            .min_by_key(|(_, cached)| cached.tick)
            .map(|(key, _)| key.clone());
        let Some(key) = lru else {
            break;
        };
        info!(db = %key, max_count, "evicting least recently used database");
        dbs.remove(&key);
    }
}

impl Inner {
    fn elect(&self, key: &DbKey, force: bool) -> Role {
        let mut inflight = self.inflight.lock();
        if let Some(rx) = inflight.get(key) {
            return Role::Waiter(rx.clone());
        }
        // checked under the in-flight lock: a leader admits before it leaves
        if !force {
            if let Some(db) = self.touch(key) {
                return Role::Hit(db);
            }
        }
        let (tx, rx) = flight::channel(None);
        inflight.insert(key.clone(), rx);
        Role::Leader(tx)
    }

    fn next_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    fn touch(&self, key: &DbKey) -> Option<Arc<Database>> {
        let tick = self.next_tick();
        let mut dbs = self.dbs.lock();
        let cached = dbs.get_mut(key)?;
        cached.last_used = Instant::now();
        cached.tick = tick;
        Some(cached.db.clone())
    }

    fn build(&self, key: &DbKey, source: &Source) -> Result<Database, CacheError> {
        info!(db = %key, path = %source.path.display(), "building database");
        let failed = |message: String| CacheError::BuildFailed {
            entity: key.entity.clone(),
            id: key.id.clone(),
            message,
        };

        let mut reader = source.open()?;
        let ndb = self.parser.parse(source, &mut reader)?;

        let genids = self.genids_for(&key.entity);
        let opts = BuildOptions::default()
            .with_label(key.to_string())
            .with_genid(GenIdAllocator::new(genids.clone()))
            .with_oids(self.oid_db())
            .with_vendors(self.oui_db());
        let db = self
            .registry
            .run(Arc::new(ndb), opts)
            .map_err(|err| failed(err.to_string()))?;

        if let Err(err) = genids.lock().save() {
            error!(db = %key, error = %err, "cannot save genid table");
        }
        Ok(db)
    }

    /// Save every dirty genid table, then drop the ones no build holds.
    /// A table still shared with a running build is kept so later builds of
    /// that entity allocate from the same table.
    fn flush_genids(&self) {
        self.genids.lock().retain(|entity, table| {
            if let Err(err) = table.lock().save() {
                error!(entity = %entity, error = %err, "cannot save genid table");
            }
            Arc::strong_count(table) > 1
        });
    }

    fn genids_for(&self, entity: &str) -> Arc<Mutex<GenIds>> {
        self.genids
            .lock()
            .entry(entity.to_string())
            .or_insert_with(|| {
                let path = self.config.data_dir.join(entity).join(genid::GENID_FILE);
                Arc::new(Mutex::new(GenIds::load(path)))
            })
            .clone()
    }

    /// Drop entries idle longer than the configured limit, ahead of a build.
    fn evict_idle(&self, incoming: &DbKey) {
        let Some(max_idle) = self.config.db_max_idle() else {
            return;
        };
        let now = Instant::now();
        self.dbs.lock().retain(|key, cached| {
            let idle = now.duration_since(cached.last_used);
            let keep = key == incoming || idle <= max_idle;
            if !keep {
                info!(db = %key, idle_secs = idle.as_secs(), "evicting idle database");
            }
            keep
        });
    }

    /// Insert a built database. Least recently used entries are evicted
    /// under the same lock, so concurrent admissions never exceed the
    /// count limit.
    fn admit(&self, key: DbKey, db: Arc<Database>) {
        let tick = self.next_tick();
        {
            let mut dbs = self.dbs.lock();
            if let Some(max_count) = self.config.db_max_count {
                evict_lru(&mut dbs, &key, max_count);
            }
            dbs.insert(
                key.clone(),
                Cached {
                    db,
                    last_used: Instant::now(),
                    tick,
                },
            );
        }
        let stats = self.stats();
        info!(
            db = %key,
            databases = stats.databases,
            in_flight = stats.in_flight,
            "database cached"
        );
    }

    fn stats(&self) -> CacheStats {
        // one lock at a time; `elect` nests dbs inside inflight
        let databases = self.dbs.lock().len();
        let in_flight = self.inflight.lock().len();
        let entity_list = usize::from(self.entities.lock().is_some());
        let db_lists = self.db_lists.lock().len();
        CacheStats {
            databases,
            in_flight,
            listings: db_lists + entity_list,
        }
    }

    fn oui_db(&self) -> Arc<LookupTable> {
        self.oui.get("oui", self.config.oui_file.as_deref())
    }

    fn oid_db(&self) -> Arc<LookupTable> {
        self.oid.get("oid", self.config.oid_file.as_deref())
    }

    /// Forget databases, listings and genid tables, and stop watching.
    fn flush(&self) {
        self.dbs.lock().clear();
        *self.entities.lock() = None;
        self.db_lists.lock().clear();
        self.flush_genids();
        let watchers = std::mem::take(&mut *self.watchers.lock());
        drop(watchers);
    }
}
