//! Cache manager tests over temporary data directories

use super::*;
use nscandb_builder::{BuildError, Ndb, Node};
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use serde_json::{json, Value};
use std::io::BufRead;
use std::sync::atomic::AtomicUsize;
use tempfile::{tempdir, TempDir};

/// JSON parser that counts the dumps it reads.
#[derive(Default)]
struct CountingParser {
    parsed: AtomicUsize,
}

impl NdbParser for CountingParser {
    fn parse(&self, source: &Source, reader: &mut dyn BufRead) -> Result<Ndb, CacheError> {
        self.parsed.fetch_add(1, Ordering::SeqCst);
        // keep the build in flight long enough for others to join it
        std::thread::sleep(Duration::from_millis(50));
        JsonNdbParser.parse(source, reader)
    }
}

fn scan(name: &str) -> Value {
    json!({
        "x-snmp-sys": {"10.0.0.1": {"sysName": name}},
        "x-snmp-if": {"10.0.0.1": {
            "1": {"ifDescr": "Gi0/1", "ifPhysAddress": "00:1b:54:00:00:01"}
        }}
    })
}

fn write_db(dir: &TempDir, entity: &str, id: &str, value: &Value) {
    let entity_dir = dir.path().join(entity);
    std::fs::create_dir_all(&entity_dir).unwrap();
    std::fs::write(entity_dir.join(format!("{id}.nscan")), value.to_string()).unwrap();
}

fn config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        data_dir: dir.path().to_path_buf(),
        watch: false,
        ..CacheConfig::default()
    }
}

fn cache_with(config: CacheConfig) -> (DbCache, Arc<CountingParser>) {
    let parser = Arc::new(CountingParser::default());
    let cache = DbCache::from_parts(config, Registry::standard().unwrap(), parser.clone());
    (cache, parser)
}

fn device_names(db: &Database) -> Vec<Value> {
    let Some(Node::Map(devices)) = db.table("sdevice") else {
        return Vec::new();
    };
    devices
        .values()
        .filter_map(|d| d.get_path(&["name"]))
        .map(Node::to_plain)
        .collect()
}

#[tokio::test]
async fn test_second_get_is_a_cache_hit() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "scan-1", &scan("sw1"));
    let (cache, parser) = cache_with(config(&dir));

    let a = cache.get_db("site", "scan-1", false).await.unwrap().unwrap();
    let b = cache.get_db("site", "scan-1", false).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 1);
    assert_eq!(device_names(&a), vec![json!(["sw1"])]);

    let c = cache.get_db("site", "scan-1", true).await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_build_once() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "scan-1", &scan("sw1"));
    let (cache, parser) = cache_with(config(&dir));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_db("site", "scan-1", false).await })
        })
        .collect();
    let mut dbs = Vec::new();
    for handle in handles {
        dbs.push(handle.await.unwrap().unwrap().unwrap());
    }

    assert_eq!(parser.parsed.load(Ordering::SeqCst), 1);
    assert!(dbs.iter().all(|db| Arc::ptr_eq(db, &dbs[0])));
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_lru_database_is_evicted() {
    let dir = tempdir().unwrap();
    for id in ["a", "b", "c"] {
        write_db(&dir, "site", id, &scan(id));
    }
    let (cache, parser) = cache_with(CacheConfig {
        db_max_count: Some(2),
        ..config(&dir)
    });

    cache.get_db("site", "a", false).await.unwrap();
    cache.get_db("site", "b", false).await.unwrap();
    // touch a, leaving b least recently used
    cache.get_db("site", "a", false).await.unwrap();
    cache.get_db("site", "c", false).await.unwrap();
    assert_eq!(cache.stats().databases, 2);
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 3);

    cache.get_db("site", "a", false).await.unwrap();
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 3);
    cache.get_db("site", "b", false).await.unwrap();
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_respect_max_count() {
    let dir = tempdir().unwrap();
    for id in ["a", "b", "c", "d"] {
        write_db(&dir, "site", id, &scan(id));
    }
    let (cache, parser) = cache_with(CacheConfig {
        db_max_count: Some(2),
        ..config(&dir)
    });
    cache.get_db("site", "a", false).await.unwrap();
    cache.get_db("site", "b", false).await.unwrap();

    let (c, d) = tokio::join!(
        cache.get_db("site", "c", false),
        cache.get_db("site", "d", false)
    );
    assert!(c.unwrap().is_some());
    assert!(d.unwrap().is_some());
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 4);
    assert_eq!(cache.stats().databases, 2);
}

#[tokio::test]
async fn test_idle_databases_are_evicted() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "a", &scan("a"));
    write_db(&dir, "site", "b", &scan("b"));
    let (cache, _) = cache_with(CacheConfig {
        db_max_idle_secs: Some(0),
        ..config(&dir)
    });

    cache.get_db("site", "a", false).await.unwrap();
    std::thread::sleep(Duration::from_millis(20));
    cache.get_db("site", "b", false).await.unwrap();
    assert_eq!(cache.stats().databases, 1);
}

#[tokio::test]
async fn test_gzip_source_is_built() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let dir = tempdir().unwrap();
    let entity_dir = dir.path().join("site");
    std::fs::create_dir_all(&entity_dir).unwrap();
    let file = std::fs::File::create(entity_dir.join("old.nscan.gz")).unwrap();
    let mut enc = GzEncoder::new(file, Compression::default());
    enc.write_all(scan("gz").to_string().as_bytes()).unwrap();
    enc.finish().unwrap();

    let cache = DbCache::new(config(&dir)).unwrap();
    let db = cache.get_db("site", "old", false).await.unwrap().unwrap();
    assert_eq!(device_names(&db), vec![json!(["gz"])]);
}

#[tokio::test]
async fn test_missing_source_is_none() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("site")).unwrap();
    let (cache, parser) = cache_with(config(&dir));

    assert!(cache.get_db("site", "nope", false).await.unwrap().is_none());
    assert!(cache.get_db("ghost", "nope", false).await.unwrap().is_none());
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().databases, 0);
}

#[tokio::test]
async fn test_invalid_names_are_not_found() {
    let dir = tempdir().unwrap();
    let (cache, _) = cache_with(config(&dir));
    let err = cache.get_db("..", "x", false).await.unwrap_err();
    assert!(err.is_not_found());
    let err = cache.get_db("site", "a/b", false).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unparseable_source_is_not_cached() {
    let dir = tempdir().unwrap();
    let entity_dir = dir.path().join("site");
    std::fs::create_dir_all(&entity_dir).unwrap();
    std::fs::write(entity_dir.join("bad.nscan"), "{ truncated").unwrap();
    let (cache, parser) = cache_with(config(&dir));

    let err = cache.get_db("site", "bad", false).await.unwrap_err();
    assert!(matches!(err, CacheError::Parse { .. }));
    assert!(cache.get_db("site", "bad", false).await.is_err());
    assert_eq!(parser.parsed.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats(), CacheStats { databases: 0, in_flight: 0, listings: 0 });
}

#[tokio::test]
async fn test_failed_stage_is_a_build_failure() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "a", &scan("a"));
    let mut registry = Registry::new();
    registry
        .register(100, "explode", |_| {
            Err(BuildError::Stage {
                name: "explode".to_string(),
                message: "boom".to_string(),
            })
        })
        .unwrap();
    let cache = DbCache::from_parts(config(&dir), registry, Arc::new(JsonNdbParser));

    let err = cache.get_db("site", "a", false).await.unwrap_err();
    match err {
        CacheError::BuildFailed { entity, id, message } => {
            assert_eq!((entity.as_str(), id.as_str()), ("site", "a"));
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cache.stats().databases, 0);
}

#[tokio::test]
async fn test_device_ids_survive_rebuilds() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "a", &scan("sw1"));
    let cache = DbCache::new(config(&dir)).unwrap();

    let first = cache.get_db("site", "a", false).await.unwrap().unwrap();
    let genid_path = dir.path().join("site").join(genid::GENID_FILE);
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&genid_path).unwrap()).unwrap();
    let did = saved["device"]["nscan"]["10.0.0.1"].as_str().unwrap().to_string();
    assert!(first.table("device").and_then(|t| t.get_path(&[did.as_str()])).is_some());

    // a fresh cache reads the persisted table
    let cache = DbCache::new(config(&dir)).unwrap();
    let second = cache.get_db("site", "a", false).await.unwrap().unwrap();
    assert!(second.table("device").and_then(|t| t.get_path(&[did.as_str()])).is_some());
}

#[test]
fn test_listings_are_cached_until_reload() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site-b", "2024-01", &scan("a"));
    write_db(&dir, "site-a", "2024-02", &scan("a"));
    let (cache, _) = cache_with(config(&dir));

    assert_eq!(*cache.entity_list().unwrap(), vec!["site-a", "site-b"]);
    assert_eq!(*cache.db_list("site-b").unwrap(), vec!["2024-01"]);
    assert_eq!(cache.stats().listings, 2);

    write_db(&dir, "site-b", "2024-03", &scan("a"));
    assert_eq!(*cache.db_list("site-b").unwrap(), vec!["2024-01"]);

    cache.reload();
    assert_eq!(cache.stats().listings, 0);
    assert_eq!(*cache.db_list("site-b").unwrap(), vec!["2024-01", "2024-03"]);
}

#[test]
fn test_unknown_entity_is_not_found() {
    let dir = tempdir().unwrap();
    let (cache, _) = cache_with(config(&dir));
    assert!(cache.db_list("ghost").unwrap_err().is_not_found());
    assert!(cache.db_list(".hidden").unwrap_err().is_not_found());
}

#[test]
fn test_directory_events_invalidate_listings() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "a", &scan("a"));
    let (cache, _) = cache_with(config(&dir));
    cache.entity_list().unwrap();
    cache.db_list("site").unwrap();

    let entity_dir = dir.path().join("site");
    let created = Event::new(EventKind::Create(notify::event::CreateKind::File))
        .add_path(entity_dir.join("b.nscan"));
    cache.inner.on_entity_event("site", &created);
    assert!(cache.inner.db_lists.lock().get("site").is_none());
    assert!(cache.inner.entities.lock().is_some());

    let new_entity = Event::new(EventKind::Create(notify::event::CreateKind::Folder))
        .add_path(dir.path().join("other"));
    cache.inner.on_root_event(&new_entity);
    assert!(cache.inner.entities.lock().is_none());
}

#[tokio::test]
async fn test_root_rename_flushes_everything() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "a", &scan("a"));
    let (cache, _) = cache_with(config(&dir));
    cache.get_db("site", "a", false).await.unwrap();
    cache.entity_list().unwrap();
    cache.db_list("site").unwrap();

    let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
        .add_path(dir.path().to_path_buf());
    cache.inner.on_root_event(&renamed);
    assert_eq!(cache.stats(), CacheStats { databases: 0, in_flight: 0, listings: 0 });

    cache.get_db("site", "a", false).await.unwrap();
    let removed = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(dir.path().to_path_buf());
    cache.inner.on_root_event(&removed);
    assert_eq!(cache.stats().databases, 0);
}

#[test]
fn test_lookup_tables_load_lazily() {
    let dir = tempdir().unwrap();
    let oui = dir.path().join("oui.json");
    std::fs::write(&oui, r#"{"00:1b:54": "Cisco"}"#).unwrap();
    let (cache, _) = cache_with(CacheConfig {
        oui_file: Some(oui),
        oid_file: Some(dir.path().join("missing.json")),
        ..config(&dir)
    });

    assert_eq!(cache.oui_db().get("00:1b:54").map(String::as_str), Some("Cisco"));
    assert!(cache.oid_db().is_empty());
}

#[test]
fn test_config_defaults_fill_missing_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nscandb.json");
    std::fs::write(&path, r#"{"db_max_count": 5}"#).unwrap();
    let config = CacheConfig::load(&path).unwrap();
    assert_eq!(config.db_max_count, Some(5));
    assert_eq!(config.data_dir, PathBuf::from("./data"));
    assert!(config.watch);
    assert!(CacheConfig::load(&dir.path().join("absent.json")).is_err());
}

#[test]
fn test_reload_keeps_genid_tables_in_use() {
    let dir = tempdir().unwrap();
    write_db(&dir, "site", "a", &scan("a"));
    write_db(&dir, "other", "a", &scan("a"));
    let (cache, _) = cache_with(config(&dir));

    // held the way a running build holds it
    let held = cache.inner.genids_for("site");
    let id = held.lock().get_or_assign(&["device", "nscan", "10.0.0.9"]);
    let idle = cache.inner.genids_for("other");
    idle.lock().get_or_assign(&["device", "nscan", "10.0.0.8"]);
    drop(idle);

    cache.reload();

    assert!(Arc::ptr_eq(&held, &cache.inner.genids_for("site")));
    assert!(!held.lock().is_dirty());
    let saved = GenIds::load(dir.path().join("other").join(genid::GENID_FILE));
    assert!(saved.get(&["device", "nscan", "10.0.0.8"]).is_some());
    let reloaded = GenIds::load(dir.path().join("site").join(genid::GENID_FILE));
    assert_eq!(reloaded.get(&["device", "nscan", "10.0.0.9"]), Some(id.as_str()));
}
