//! Input sanitation: drop scan data known to be wrong before anything is
//! built from it.

use std::collections::HashSet;

use nscandb_model::value_to_key;
use serde_json::Value;
use tracing::debug;

use crate::build::{text, Build, Ndb};
use crate::error::BuildError;

const SAMSUNG_C1860: &str = "Samsung C1860 ";

pub fn run(b: &mut Build) -> Result<(), BuildError> {
    let buggy: Vec<String> = b
        .ndb()
        .get("x-snmp-sys")
        .and_then(Value::as_object)
        .map(|sys| {
            sys.iter()
                .filter(|(_, v)| text(v, "sysDescr").is_some_and(|d| d.starts_with(SAMSUNG_C1860)))
                .map(|(k1, _)| k1.clone())
                .collect()
        })
        .unwrap_or_default();
    if !buggy.is_empty() {
        let ndb = b.ndb_mut();
        for k1 in &buggy {
            drop_samsung_c1860(ndb, k1);
        }
    }

    // Management controllers answer SNMP on behalf of their host: the scanned
    // address is then missing from the ipAdEnt table it returns.
    let passthrough: Vec<String> = b
        .ndb()
        .get("x-snmp-ipAdEnt")
        .and_then(Value::as_object)
        .map(|ip_ad_ent| {
            ip_ad_ent
                .iter()
                .filter(|(scan_ip, entries)| entries.get(scan_ip.as_str()).is_none())
                .map(|(scan_ip, _)| scan_ip.clone())
                .collect()
        })
        .unwrap_or_default();
    if !passthrough.is_empty() {
        let ndb = b.ndb_mut();
        for scan_ip in &passthrough {
            for (table, records) in ndb.iter_mut().filter(|(t, _)| t.contains("snmp")) {
                if let Some(records) = records.as_object_mut() {
                    if records.remove(scan_ip).is_some() {
                        debug!(table = %table, key = %scan_ip, "delete ndb entry");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Its ARP OIDs carry malformed addresses and some tables refer to
/// interfaces that do not exist.
fn drop_samsung_c1860(ndb: &mut Ndb, k1: &str) {
    if let Some(Value::Object(arp)) = ndb.get_mut("x-snmp-arp") {
        if arp.remove(k1).is_some() {
            debug!(key = %k1, "delete ndb entry x-snmp-arp");
        }
    }
    let Some(if_table) = ndb.get("x-snmp-if").and_then(|t| t.get(k1)).and_then(Value::as_object) else {
        return;
    };
    let real: HashSet<String> = if_table.keys().cloned().collect();
    for (table, records) in ndb.iter_mut() {
        if let Some(device) = records.get_mut(k1) {
            drop_unknown_if_index(device, &real, table);
        }
    }
}

fn drop_unknown_if_index(node: &mut Value, real: &HashSet<String>, table: &str) {
    let Value::Object(fields) = node else {
        return;
    };
    fields.retain(|key, child| {
        let stale = child
            .get("ifIndex")
            .and_then(value_to_key)
            .is_some_and(|i| !real.contains(&i));
        if stale {
            debug!(table = %table, key = %key, "delete ndb entry with unknown ifIndex");
        }
        !stale
    });
    for child in fields.values_mut() {
        drop_unknown_if_index(child, real, table);
    }
}
