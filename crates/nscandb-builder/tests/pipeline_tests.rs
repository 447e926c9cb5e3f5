//! End-to-end runs of the standard stage list over small scans.

use std::collections::HashMap;
use std::sync::Arc;

use nscandb_builder::{BuildOptions, Database, Ndb, Node, Registry};
use serde_json::{json, Value};

const SW1: &str = "device:nscan:10.0.0.1";
const PC: &str = "device:nscan:10.0.0.50";

fn ndb(value: Value) -> Arc<Ndb> {
    match value {
        Value::Object(tables) => Arc::new(tables),
        other => panic!("not a table map: {other}"),
    }
}

fn build(value: Value) -> Database {
    let vendors: HashMap<String, String> = HashMap::from([("aa:bb:cc".to_string(), "Acme".to_string())]);
    let opts = BuildOptions::default()
        .with_label("site/scan-1")
        .with_genid(|path: &[String]| path.join(":"))
        .with_vendors(Arc::new(vendors));
    Registry::standard()
        .unwrap()
        .run(ndb(value), opts)
        .unwrap()
}

fn plain(db: &Database, table: &str, path: &[&str]) -> Value {
    db.table(table)
        .and_then(|t| t.get_path(path))
        .map(Node::to_plain)
        .unwrap_or(Value::Null)
}

fn one_switch_one_host() -> Value {
    json!({
        "cb-ipv4-fping": {"sweep": {"10.0.0.1": {}, "10.0.0.50": {}}},
        "x-snmp-sys": {"10.0.0.1": {"sysName": "sw1.lan", "sysDescr": "Cisco IOS Software"}},
        "x-snmp-if": {"10.0.0.1": {
            "1": {
                "ifDescr": "GigabitEthernet0/1", "ifPhysAddress": "00:1b:54:00:00:01",
                "ifAdminStatus": 1, "ifOperStatus": 1, "ifSpeed": 1000000000,
                "duplexStatus": 3, "ifAlias": "to pc"
            },
            "2": {"ifDescr": "Vlan1", "ifPhysAddress": "00:1b:54:00:00:02", "ifAdminStatus": 1, "ifOperStatus": 1}
        }},
        "x-snmp-ipAdEnt": {"10.0.0.1": {
            "10.0.0.1": {"ip": "10.0.0.1", "ifIndex": 2, "mask": "255.255.255.0"}
        }},
        "x-snmp-arp": {"10.0.0.1": {
            "2.10.0.0.50": {"ip": "10.0.0.50", "mac": "aa:bb:cc:00:00:50", "ifIndex": 2}
        }},
        "x-snmp-dot1dBasePort": {"10.0.0.1": {"1": {"dot1dBasePort": 1, "ifIndex": 1}}},
        "x-snmp-dot1dTpFdb": {"10.0.0.1": {
            "aa:bb:cc:00:00:50": {"mac": "aa:bb:cc:00:00:50", "dot1dBasePort": 1}
        }}
    })
}

#[test]
fn every_serving_table_is_built() {
    let db = build(one_switch_one_host());
    for table in [
        "device", "sdevice", "swport", "sswport", "fdb", "sfdb", "rfdb", "srfdb", "nei", "snei", "rarp", "hiface",
    ] {
        assert!(db.table(table).is_some(), "missing table {table}");
    }
    assert!(db.to_resolve.is_empty());
}

#[test]
fn scan_and_sweep_identify_the_same_device() {
    let db = build(one_switch_one_host());
    assert_eq!(plain(&db, "ualias", &["device", "ip", "10.0.0.1"]), json!(SW1));
    assert_eq!(plain(&db, "sdevice", &[SW1, "name"]), json!(["sw1.lan"]));
    assert_eq!(plain(&db, "sdevice", &[SW1, "ip"]), json!(["10.0.0.1"]));
    assert_eq!(
        plain(&db, "sdevice", &[SW1, "iface", "Vlan1", "ip"]),
        json!(["10.0.0.1/24"])
    );
}

#[test]
fn arp_and_fdb_attach_the_host() {
    let db = build(one_switch_one_host());
    assert_eq!(plain(&db, "sdevice", &[PC, "mac"]), json!(["aa:bb:cc:00:00:50"]));
    assert_eq!(
        plain(&db, "rarp", &["10.0.0.50", "aa:bb:cc:00:00:50", SW1]),
        json!("Vlan1")
    );
    assert_eq!(
        plain(&db, "sfdb", &[SW1, "GigabitEthernet0/1"]),
        json!([{"mac": "aa:bb:cc:00:00:50"}])
    );
    assert_eq!(
        plain(&db, "srfdb", &["aa:bb:cc:00:00:50"]),
        json!([{"did": SW1, "ifname": "GigabitEthernet0/1"}])
    );
}

#[test]
fn interface_rows_show_learned_hosts() {
    let db = build(one_switch_one_host());
    let rows = plain(&db, "hiface", &[SW1]);
    let row = rows
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["name"] == json!("GigabitEthernet0/1")))
        .cloned()
        .unwrap();
    assert_eq!(row["dname"], json!("sw1.lan"));
    assert_eq!(row["status"], json!("up / up"));
    assert_eq!(row["speed"], json!("1G / full"));
    assert_eq!(row["description"], json!("to pc"));
    assert_eq!(
        row["peers"],
        json!([{
            "id": PC, "label": "10.0.0.50", "ip": "10.0.0.50",
            "mac": "aa:bb:cc:00:00:50", "vendor": "Acme"
        }])
    );

    let vendors: HashMap<String, String> = HashMap::new();
    let q = db.queries(&vendors);
    assert_eq!(q.device_best_name(PC, true), "10.0.0.50");
    assert_eq!(q.device_best_name(SW1, true), "sw1");
}

#[test]
fn passthrough_management_controller_is_dropped() {
    let mut scan = one_switch_one_host();
    scan["x-snmp-sys"]["10.0.0.9"] = json!({"sysName": "bmc"});
    scan["x-snmp-ipAdEnt"]["10.0.0.9"] = json!({
        "10.0.0.200": {"ip": "10.0.0.200", "ifIndex": 1, "mask": "255.255.255.0"}
    });
    let db = build(scan);
    assert_eq!(plain(&db, "ualias", &["device", "name", "bmc"]), Value::Null);
    assert_eq!(plain(&db, "ualias", &["device", "ip", "10.0.0.200"]), Value::Null);
    assert_eq!(plain(&db, "sdevice", &[SW1, "name"]), json!(["sw1.lan"]));
}

#[test]
fn database_serializes_tables_and_diagnostics() {
    let db = build(one_switch_one_host());
    let out = serde_json::to_value(&db).unwrap();
    assert!(out.get("sdevice").is_some());
    assert_eq!(out["toResolve"], json!([]));
    assert!(out.get("ndb").is_none());
}

#[test]
fn empty_scan_builds_empty_tables() {
    let db = build(json!({}));
    assert_eq!(db.table("device"), Some(&Node::map()));
    assert_eq!(db.table("hiface"), Some(&Node::map()));
}
