//! Build context and the path-addressed store primitives.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use nscandb_model::{value_as_i64, value_to_key, Data, DataList, Node};
use serde::Serialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::BuildError;
use crate::lookup::{OidLookup, VendorLookup};

/// Parsed nscan tables: table → scan key → records.
pub type Ndb = serde_json::Map<String, Value>;

/// Output tables by name.
pub type Tables = IndexMap<String, Node>;

// ============================================================================
// Options
// ============================================================================

/// Source of new device ids, given the identity path they are created for
/// (`["device", kind, key]`).
pub trait IdGenerator: Send {
    fn generate(&mut self, path: &[String]) -> String;
}

impl<F> IdGenerator for F
where
    F: FnMut(&[String]) -> String + Send,
{
    fn generate(&mut self, path: &[String]) -> String {
        self(path)
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn generate(&mut self, _path: &[String]) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub struct BuildOptions {
    /// Carried by every log line of the run, usually `<entity>/<id>`.
    pub label: String,
    pub genid: Box<dyn IdGenerator>,
    pub oids: Arc<dyn OidLookup>,
    pub vendors: Arc<dyn VendorLookup>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            label: "build".to_string(),
            genid: Box::new(RandomIds),
            oids: Arc::new(HashMap::<String, String>::new()),
            vendors: Arc::new(HashMap::<String, String>::new()),
        }
    }
}

impl BuildOptions {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_genid(mut self, genid: impl IdGenerator + 'static) -> Self {
        self.genid = Box::new(genid);
        self
    }

    pub fn with_oids(mut self, oids: Arc<dyn OidLookup>) -> Self {
        self.oids = oids;
        self
    }

    pub fn with_vendors(mut self, vendors: Arc<dyn VendorLookup>) -> Self {
        self.vendors = vendors;
        self
    }
}

// ============================================================================
// Deferred conflicts
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Conflict {
    /// A unique-alias write that met a different value.
    Add {
        table: String,
        path: Vec<String>,
        value: Value,
        current: Value,
    },
    /// An ARP entry whose IP and MAC point at different devices.
    Arp {
        did: String,
        entry: Value,
        table: String,
        did_from_ip: String,
        did_from_mac: String,
    },
    /// A CDP/LLDP neighbor that could not be pinned to one device.
    Neighbor {
        protocol: String,
        did: String,
        ifname: String,
        entry: Value,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Unresolved {
    #[serde(flatten)]
    pub conflict: Conflict,
    pub comment: String,
}

// ============================================================================
// Build context
// ============================================================================

/// What to do when a write finds its slot already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    Fail,
    Overwrite,
    /// Accept only an equal value.
    ImmutableData,
    /// Union into the existing datalist.
    AppendList,
    /// Keep the current value and queue the conflict for resolution.
    UniqueAlias,
}

/// Which key of a two-level ndb table identifies the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKey {
    First,
    Second,
}

pub struct Build {
    pub(crate) label: String,
    genid: Box<dyn IdGenerator>,
    pub(crate) oids: Arc<dyn OidLookup>,
    pub(crate) vendors: Arc<dyn VendorLookup>,
    pub(crate) ndb: Arc<Ndb>,
    pub(crate) db: Tables,
    pub(crate) to_resolve: Vec<Unresolved>,
}

impl Build {
    pub fn new(ndb: Arc<Ndb>, opts: BuildOptions) -> Self {
        Self {
            label: opts.label,
            genid: opts.genid,
            oids: opts.oids,
            vendors: opts.vendors,
            ndb,
            db: Tables::new(),
            to_resolve: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ndb(&self) -> &Ndb {
        &self.ndb
    }

    /// Mutable input tables; copies them first if the input is shared.
    pub fn ndb_mut(&mut self) -> &mut Ndb {
        Arc::make_mut(&mut self.ndb)
    }

    pub fn tables(&self) -> &Tables {
        &self.db
    }

    pub fn table(&self, name: &str) -> Option<&Node> {
        self.db.get(name)
    }

    pub fn set_table(&mut self, name: &str, node: Node) {
        self.db.insert(name.to_string(), node);
    }

    pub fn to_resolve(&self) -> &[Unresolved] {
        &self.to_resolve
    }

    pub fn oids(&self) -> &dyn OidLookup {
        self.oids.as_ref()
    }

    pub fn vendors(&self) -> &dyn VendorLookup {
        self.vendors.as_ref()
    }

    pub fn add_to_resolve(&mut self, unresolved: Unresolved) {
        warn!(comment = %unresolved.comment, "toResolve, mark for later analysis");
        self.to_resolve.push(unresolved);
    }

    // ------------------------------------------------------------------------
    // store primitives
    // ------------------------------------------------------------------------

    fn parent_mut(
        &mut self,
        table: &str,
        path: &[String],
    ) -> Result<&mut IndexMap<String, Node>, BuildError> {
        if path.is_empty() {
            return Err(BuildError::EmptyPath {
                table: table.to_string(),
            });
        }
        let not_a_map = |at: &str| BuildError::NotAMap {
            table: table.to_string(),
            path: path.join("."),
            at: at.to_string(),
        };
        let mut node = self
            .db
            .entry(table.to_string())
            .or_insert_with(Node::map);
        let mut at = table;
        for key in &path[..path.len() - 1] {
            node = match node {
                Node::Map(map) => map.entry(key.clone()).or_insert_with(Node::map),
                _ => return Err(not_a_map(at)),
            };
            at = key.as_str();
        }
        match node {
            Node::Map(map) => Ok(map),
            _ => Err(not_a_map(at)),
        }
    }

    /// Write `value` at `table.path`, creating intermediate maps. An occupied
    /// slot is handled by `policy`.
    pub fn add<P: AsRef<str>>(
        &mut self,
        table: &str,
        path: &[P],
        value: Node,
        policy: OnConflict,
    ) -> Result<(), BuildError> {
        let path = owned_path(path);
        let deferred = {
            let parent = self.parent_mut(table, &path)?;
            let key = &path[path.len() - 1];
            match parent.get_mut(key) {
                None => {
                    parent.insert(key.clone(), value);
                    None
                }
                Some(current) => settle(table, &path, current, value, policy)?,
            }
        };
        if let Some(unresolved) = deferred {
            self.add_to_resolve(unresolved);
        }
        Ok(())
    }

    /// Read `table.path`. Never creates anything.
    pub fn get<P: AsRef<str>>(&self, table: &str, path: &[P]) -> Option<&Node> {
        let mut node = self.db.get(table)?;
        for key in path {
            node = node.get(key.as_ref())?;
        }
        Some(node)
    }

    pub(crate) fn get_mut<P: AsRef<str>>(&mut self, table: &str, path: &[P]) -> Option<&mut Node> {
        let mut node = self.db.get_mut(table)?;
        for key in path {
            node = node.as_map_mut()?.get_mut(key.as_ref())?;
        }
        Some(node)
    }

    /// Remove and return `table.path`.
    pub fn remove<P: AsRef<str>>(&mut self, table: &str, path: &[P]) -> Option<Node> {
        let (last, parents) = path.split_last()?;
        self.get_mut(table, parents)?
            .as_map_mut()?
            .shift_remove(last.as_ref())
    }

    pub fn set<P: AsRef<str>>(&mut self, table: &str, path: &[P], value: Node) -> Result<(), BuildError> {
        self.add(table, path, value, OnConflict::Overwrite)
    }

    pub fn add_immutable_data<P: AsRef<str>>(
        &mut self,
        table: &str,
        path: &[P],
        data: Data,
    ) -> Result<(), BuildError> {
        self.add(table, path, Node::Data(data), OnConflict::ImmutableData)
    }

    pub fn add_datalist<P: AsRef<str>>(
        &mut self,
        table: &str,
        path: &[P],
        list: DataList,
    ) -> Result<(), BuildError> {
        self.add(table, path, Node::List(list), OnConflict::AppendList)
    }

    /// Unique alias: `ualias.path` maps to exactly one value; a different
    /// value is queued as a conflict.
    pub fn ualias<P: AsRef<str>>(&mut self, path: &[P], value: Value) -> Result<(), BuildError> {
        self.add("ualias", path, Node::Value(value), OnConflict::UniqueAlias)
    }

    pub fn ualias_get<P: AsRef<str>>(&self, path: &[P]) -> Option<&Value> {
        self.get("ualias", path).and_then(Node::as_value)
    }

    /// Unique alias as text (device ids, interface names).
    pub fn ualias_str<P: AsRef<str>>(&self, path: &[P]) -> Option<String> {
        self.ualias_get(path).and_then(value_to_key)
    }

    /// Multi alias: `malias.path.<did> = did`.
    pub fn malias<P: AsRef<str>>(&mut self, path: &[P], did: &str) -> Result<(), BuildError> {
        let mut full = owned_path(path);
        full.push(did.to_string());
        self.set("malias", &full, Node::from(did))
    }

    /// Every device id `malias.device.<kind>.<value>` points at.
    pub fn malias_dids(&self, kind: &str, value: &str) -> Vec<String> {
        self.get("malias", &["device", kind, value])
            .map(|n| n.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Id stored at `table.path`, generated and stored when missing.
    pub fn get_or_gen_id<P: AsRef<str>>(&mut self, table: &str, path: &[P]) -> Result<String, BuildError> {
        if let Some(id) = self
            .get(table, path)
            .and_then(Node::as_value)
            .and_then(value_to_key)
        {
            return Ok(id);
        }
        let path = owned_path(path);
        let id = self.genid.generate(&path);
        self.add(table, &path, Node::from(id.as_str()), OnConflict::Fail)?;
        Ok(id)
    }

    /// Device id for the identity `(kind, key)`, creating the device entry.
    pub fn add_device(&mut self, kind: &str, key: &str, origin: &str) -> Result<String, BuildError> {
        let did = self.get_or_gen_id("ualias", &["device", kind, key])?;
        self.add_immutable_data("device", &[did.as_str(), "id"], Data::new(did.as_str(), origin))?;
        Ok(did)
    }

    // ------------------------------------------------------------------------
    // ndb iteration
    // ------------------------------------------------------------------------

    /// Visit `ndb[table][k1]`, the device being identified by `k1`.
    pub fn for_each1<F>(&mut self, table: &str, mut f: F) -> Result<(), BuildError>
    where
        F: FnMut(&mut Build, &str, &str, &Value) -> Result<(), BuildError>,
    {
        let ndb = Arc::clone(&self.ndb);
        let Some(Value::Object(records)) = ndb.get(table) else {
            return Ok(());
        };
        for (k1, record) in records {
            let did = self.add_device("nscan", k1, table)?;
            trace!(table, k1 = %k1, "for_each1");
            f(self, &did, k1.as_str(), record)?;
        }
        Ok(())
    }

    /// Visit `ndb[table][k1][k2]`, the device being identified by `key`.
    pub fn for_each2<F>(&mut self, table: &str, key: DeviceKey, mut f: F) -> Result<(), BuildError>
    where
        F: FnMut(&mut Build, &str, &str, &str, &Value) -> Result<(), BuildError>,
    {
        let ndb = Arc::clone(&self.ndb);
        let Some(Value::Object(level1)) = ndb.get(table) else {
            return Ok(());
        };
        for (k1, level2) in level1 {
            let Value::Object(records) = level2 else {
                continue;
            };
            for (k2, record) in records {
                let scan_key = match key {
                    DeviceKey::First => k1,
                    DeviceKey::Second => k2,
                };
                let did = self.add_device("nscan", scan_key, table)?;
                trace!(table, k1 = %k1, k2 = %k2, "for_each2");
                f(self, &did, k1.as_str(), k2.as_str(), record)?;
            }
        }
        Ok(())
    }
}

fn settle(
    table: &str,
    path: &[String],
    current: &mut Node,
    value: Node,
    policy: OnConflict,
) -> Result<Option<Unresolved>, BuildError> {
    match policy {
        OnConflict::Overwrite => {
            *current = value;
            Ok(None)
        }
        OnConflict::AppendList => match (current, value) {
            (Node::List(list), Node::List(more)) => {
                list.append(more);
                Ok(None)
            }
            (current, value) => Err(BuildError::conflict(
                table,
                path,
                &value.to_plain(),
                &current.to_plain(),
            )),
        },
        OnConflict::ImmutableData | OnConflict::UniqueAlias if *current == value => Ok(None),
        OnConflict::UniqueAlias => {
            let value = value.to_plain();
            let current = current.to_plain();
            Ok(Some(Unresolved {
                comment: format!(
                    "cannot set {table}.{} to {value}, conflict with {current}",
                    path.join(".")
                ),
                conflict: Conflict::Add {
                    table: table.to_string(),
                    path: path.to_vec(),
                    value,
                    current,
                },
            }))
        }
        OnConflict::Fail | OnConflict::ImmutableData => Err(BuildError::conflict(
            table,
            path,
            &value.to_plain(),
            &current.to_plain(),
        )),
    }
}

pub(crate) fn owned_path<P: AsRef<str>>(path: &[P]) -> Vec<String> {
    path.iter().map(|p| p.as_ref().to_string()).collect()
}

// ============================================================================
// Record fields
// ============================================================================

/// Non-null field of an ndb record.
pub(crate) fn field<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
    record.get(key).filter(|v| !v.is_null())
}

/// Scalar field as text.
pub(crate) fn text(record: &Value, key: &str) -> Option<String> {
    field(record, key).and_then(value_to_key)
}

pub(crate) fn int(record: &Value, key: &str) -> Option<i64> {
    field(record, key).and_then(value_as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build() -> Build {
        let mut n = 0;
        let opts = BuildOptions::default().with_genid(move |_: &[String]| {
            n += 1;
            format!("d{n}")
        });
        Build::new(Arc::new(Ndb::new()), opts)
    }

    #[test]
    fn add_creates_intermediate_maps() {
        let mut b = build();
        b.set("device", &["d1", "iface", "Gi0/1", "x"], Node::from("v")).unwrap();
        assert_eq!(
            b.get("device", &["d1", "iface", "Gi0/1", "x"]).and_then(Node::as_str),
            Some("v")
        );
        assert!(b.get("device", &["d2"]).is_none());
        assert!(b.get("device", &["d2", "x"]).is_none());
        assert!(b.get("device", &["d2"]).is_none(), "get must not create nodes");
    }

    #[test]
    fn writing_through_a_leaf_fails() {
        let mut b = build();
        b.set("device", &["d1", "name"], Node::from("sw1")).unwrap();
        let err = b.set("device", &["d1", "name", "x"], Node::from("v")).unwrap_err();
        assert!(matches!(err, BuildError::NotAMap { ref at, .. } if at == "name"));
        let empty: [&str; 0] = [];
        assert!(matches!(
            b.set("device", &empty, Node::from("v")),
            Err(BuildError::EmptyPath { .. })
        ));
    }

    #[test]
    fn immutable_data_accepts_equal_value_only() {
        let mut b = build();
        b.add_immutable_data("device", &["d1", "id"], Data::new("d1", "fping")).unwrap();
        b.add_immutable_data("device", &["d1", "id"], Data::new("d1", "x-snmp-sys")).unwrap();
        assert!(matches!(
            b.add_immutable_data("device", &["d1", "id"], Data::new("d2", "fping")),
            Err(BuildError::Conflict { .. })
        ));
    }

    #[test]
    fn datalists_accumulate() {
        let mut b = build();
        b.add_datalist("device", &["d1", "ip"], DataList::single("10.0.0.1", "fping")).unwrap();
        b.add_datalist("device", &["d1", "ip"], DataList::single("10.0.0.1", "x-snmp-ipAdEnt")).unwrap();
        let list = b.get("device", &["d1", "ip"]).and_then(Node::as_list).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn unique_alias_conflict_is_deferred() {
        let mut b = build();
        b.ualias(&["device", "ip", "10.0.0.1"], json!("d1")).unwrap();
        b.ualias(&["device", "ip", "10.0.0.1"], json!("d1")).unwrap();
        assert!(b.to_resolve().is_empty());
        b.ualias(&["device", "ip", "10.0.0.1"], json!("d2")).unwrap();
        assert_eq!(b.ualias_str(&["device", "ip", "10.0.0.1"]).as_deref(), Some("d1"));
        assert_eq!(b.to_resolve().len(), 1);
        match &b.to_resolve()[0].conflict {
            Conflict::Add { value, current, .. } => {
                assert_eq!(value, &json!("d2"));
                assert_eq!(current, &json!("d1"));
            }
            other => panic!("unexpected conflict {other:?}"),
        }
    }

    #[test]
    fn devices_get_stable_ids_per_identity() {
        let mut b = build();
        let a = b.add_device("nscan", "10.0.0.1", "fping").unwrap();
        let again = b.add_device("nscan", "10.0.0.1", "x-snmp-sys").unwrap();
        let other = b.add_device("nscan", "10.0.0.2", "fping").unwrap();
        assert_eq!(a, again);
        assert_ne!(a, other);
        assert!(b.get("device", &[a.as_str(), "id"]).and_then(Node::as_data).is_some());
    }

    #[test]
    fn multi_alias_lists_all_devices() {
        let mut b = build();
        b.malias(&["device", "mac", "aa"], "d1").unwrap();
        b.malias(&["device", "mac", "aa"], "d2").unwrap();
        b.malias(&["device", "mac", "aa"], "d1").unwrap();
        assert_eq!(b.malias_dids("mac", "aa"), vec!["d1", "d2"]);
        assert!(b.malias_dids("mac", "bb").is_empty());
    }

    #[test]
    fn for_each_visits_records_with_device() {
        let ndb = json!({
            "x-snmp-if": { "10.0.0.1": { "1": { "ifDescr": "Gi0/1" }, "2": { "ifDescr": "Gi0/2" } } }
        });
        let Value::Object(ndb) = ndb else { unreachable!() };
        let mut b = Build::new(Arc::new(ndb), BuildOptions::default());
        let mut seen = Vec::new();
        b.for_each2("x-snmp-if", DeviceKey::First, |b, did, _, k2, v| {
            assert!(b.get("device", &[did]).is_some());
            seen.push((k2.to_string(), text(v, "ifDescr")));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], ("2".to_string(), Some("Gi0/2".to_string())));
    }
}
