//! Deferred conflict resolution.
//!
//! Unique-alias conflicts on device identity (`ualias.device.*`) mean two
//! device entries claim the same IP, MAC or name. They are settled in rounds:
//!
//! ```text
//! round ─┬─ alias conflict ─┬─ devices share a MAC ──> merge the newer into the current
//!        │                  ├─ both hold the IP as /32 ──> virtual IP, drop
//!        │                  └─ otherwise ──> replay (re-queued if still conflicting)
//!        ├─ ARP conflict ──> set aside
//!        └─ anything else ──> kept
//! ```
//!
//! Rounds repeat while one of them resolved something, up to
//! [`MAX_ROUNDS`]. ARP conflicts are then replayed once the device set is
//! stable, in the same two passes as the main ARP table.

use std::collections::HashSet;

use indexmap::IndexMap;
use nscandb_model::{value_to_key, Node};
use serde_json::Value;
use tracing::{debug, warn};

use super::helpers::iface_ips_prefix;
use super::l3::process_arp_entry;
use crate::build::{Build, Conflict, Unresolved};
use crate::error::BuildError;

const MAX_ROUNDS: usize = 200;

/// MACs that unrelated hosts share (virtual adapters, VPN clients, bogus
/// firmware). A match on these never makes two devices the same.
pub const SHARED_MAC_DENYLIST: [&str; 15] = [
    "00:05:9a:3c:7a:00", // cisco anyconnect
    "00:50:56:c0:00:01", // vmware vmnet1
    "00:50:56:c0:00:08", // vmware vmnet8
    "00:a0:c6:00:00:00", // qualcomm
    "02:00:4e:43:50:49", // ncp secure client
    "02:80:37:ec:02:00", // ericsson 3g modem
    "0a:00:27:00:00:00", // virtualbox host-only
    "20:41:53:59:4e:ff", // windows ras async adapter
    "24:b6:20:52:41:53", // kaspersky ndis miniport
    "33:50:6f:45:30:30", // windows wan miniport pppoe
    "50:50:54:50:30:30", // windows wan miniport pptp
    "d2:0a:2d:a0:04:be",
    "d2:6b:25:2f:2c:e7",
    "e2:e6:16:20:0a:35",
    "00:0b:ca:fe:00:00", // juniper bme0
];

pub(super) fn try_resolve(b: &mut Build) -> Result<(), BuildError> {
    let mut arp = Vec::new();
    let mut round = 0;
    loop {
        round += 1;
        let pending = std::mem::take(&mut b.to_resolve);
        debug!(round, pending = pending.len(), "resolve conflicts");
        let mut resolved = false;
        for unresolved in pending {
            debug!(comment = %unresolved.comment, "on conflict");
            match unresolved.conflict {
                Conflict::Add { ref table, ref path, ref value, ref current } if table == "ualias" => {
                    resolved |= resolve_alias(b, path, value, current)?;
                }
                Conflict::Arp { .. } => arp.push(unresolved),
                _ => {
                    debug!("no resolution handler, keep");
                    b.to_resolve.push(unresolved);
                }
            }
        }
        if !resolved {
            break;
        }
        if round >= MAX_ROUNDS {
            warn!(rounds = round, pending = b.to_resolve.len(), "resolver round limit reached");
            break;
        }
    }

    replay_arp(b, arp)
}

/// Settle one unique-alias conflict. Returns whether it was resolved, as
/// opposed to dropped as stale or replayed.
fn resolve_alias(b: &mut Build, path: &[String], value: &Value, current: &Value) -> Result<bool, BuildError> {
    if path.first().map(String::as_str) == Some("device") {
        let (Some(value_did), Some(current_did)) = (value_to_key(value), value_to_key(current)) else {
            return Ok(false);
        };
        if b.get("device", &[value_did.as_str()]).is_none() {
            debug!(did = %value_did, "device not found, maybe merged earlier, drop");
            return Ok(false);
        }
        if b.get("device", &[current_did.as_str()]).is_none() {
            debug!(did = %current_did, "device not found, maybe merged earlier, replay");
            b.ualias(path, value.clone())?;
            return Ok(false);
        }
        if guess_same_device(b, &current_did, &value_did) && merge_device(b, &current_did, &value_did)? {
            return Ok(true);
        }
        if let (Some("ip"), Some(ip)) = (path.get(1).map(String::as_str), path.get(2)) {
            if guess_virtual_ip(b, &value_did, &current_did, ip) {
                debug!(ip = %ip, did1 = %current_did, did2 = %value_did, "virtual ip, drop");
                return Ok(true);
            }
        }
    }
    debug!(path = %path.join("."), "no specific resolution for this alias, replay");
    b.ualias(path, value.clone())?;
    Ok(false)
}

fn replay_arp(b: &mut Build, conflicts: Vec<Unresolved>) -> Result<(), BuildError> {
    let entries: Vec<(String, Value, String)> = conflicts
        .into_iter()
        .filter_map(|u| match u.conflict {
            Conflict::Arp { did, entry, table, .. } => Some((did, entry, table)),
            _ => None,
        })
        .collect();

    debug!(entries = entries.len(), "replay arp entries, pass 1");
    let mut delayed = Vec::new();
    for (did, entry, table) in entries {
        if !process_arp_entry(b, &did, &entry, &table, true)? {
            delayed.push((did, entry, table));
        }
    }
    debug!(entries = delayed.len(), "replay arp entries, pass 2");
    for (did, entry, table) in delayed {
        process_arp_entry(b, &did, &entry, &table, false)?;
    }
    Ok(())
}

// ============================================================================
// Guesses
// ============================================================================

/// An address both devices hold as a host route is a shared virtual address
/// (HSRP/VRRP), not an identity.
fn guess_virtual_ip(b: &Build, did1: &str, did2: &str, ip: &str) -> bool {
    iface_ips_prefix(b, did1).get(ip) == Some(&32) && iface_ips_prefix(b, did2).get(ip) == Some(&32)
}

/// Nexus parents number FEX host ports `Ethernet101/..` to `Ethernet199/..`;
/// those ports carry the parent MAC.
fn is_fex_host_port(ifname: &str) -> bool {
    ifname
        .strip_prefix("Ethernet")
        .and_then(|rest| rest.get(..3))
        .filter(|digits| digits.starts_with('1') && digits.bytes().all(|c| c.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u32>().ok())
        .is_some_and(|id| (101..=199).contains(&id))
}

fn device_macs(b: &Build, did: &str) -> HashSet<String> {
    b.get("device", &[did, "mac"])
        .and_then(Node::as_list)
        .map(|l| l.str_values().into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

fn fex_host_port_macs(b: &Build, did: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(ifaces) = b.get("device", &[did, "iface"]).and_then(Node::as_map) else {
        return out;
    };
    for (name, iface) in ifaces.iter().filter(|(name, _)| is_fex_host_port(name)) {
        if let Some(macs) = iface.get("mac").and_then(Node::as_list) {
            debug!(did = %did, ifname = %name, "exclude fex host port macs");
            out.extend(macs.str_values().into_iter().map(str::to_string));
        }
    }
    out
}

/// Two devices are the same when they share a MAC that is neither a FEX host
/// port MAC nor a known shared MAC.
fn guess_same_device(b: &Build, did1: &str, did2: &str) -> bool {
    let macs2 = device_macs(b, did2);
    let mut shared: HashSet<String> = device_macs(b, did1).into_iter().filter(|m| macs2.contains(m)).collect();
    if shared.is_empty() {
        return false;
    }
    for excluded in fex_host_port_macs(b, did1).into_iter().chain(fex_host_port_macs(b, did2)) {
        shared.remove(&excluded);
    }
    for excluded in SHARED_MAC_DENYLIST {
        shared.remove(excluded);
    }
    debug!(did1 = %did1, did2 = %did2, shared = ?shared, "same device guess");
    !shared.is_empty()
}

// ============================================================================
// Merge
// ============================================================================

/// Merge device `did2` into `did1` and point every alias of `did2` at `did1`.
/// Returns `false` when either device is missing.
pub(super) fn merge_device(b: &mut Build, did1: &str, did2: &str) -> Result<bool, BuildError> {
    if b.get("device", &[did1]).is_none() || b.get("device", &[did2]).is_none() {
        return Ok(false);
    }
    debug!(did1 = %did1, did2 = %did2, "merge device");

    // ualias.device.<kind>.<value> = did
    if let Some(kinds) = b.get_mut("ualias", &["device"]).and_then(Node::as_map_mut) {
        for values in kinds.values_mut().filter_map(Node::as_map_mut) {
            for alias in values.values_mut() {
                if alias.as_str() == Some(did2) {
                    *alias = Node::from(did1);
                }
            }
        }
    }

    // ualias.iface.<did>.<alias> = ifname, existing aliases of did1 win
    if let Some(Node::Map(aliases)) = b.remove("ualias", &["iface", did2]) {
        for (alias, name) in aliases {
            if b.get("ualias", &["iface", did1, alias.as_str()]).is_none() {
                b.set("ualias", &["iface", did1, alias.as_str()], name)?;
            }
        }
    }

    // malias.device.<kind>.<value>.<did> = did
    if let Some(kinds) = b.get_mut("malias", &["device"]).and_then(Node::as_map_mut) {
        for values in kinds.values_mut().filter_map(Node::as_map_mut) {
            for dids in values.values_mut().filter_map(Node::as_map_mut) {
                if dids.shift_remove(did2).is_some() {
                    dids.insert(did1.to_string(), Node::from(did1));
                }
            }
        }
    }

    // rarp.<ip>.<mac>.<did> = ifIndex
    if let Some(ips) = b.get_mut("rarp", &[] as &[&str]).and_then(Node::as_map_mut) {
        for macs in ips.values_mut().filter_map(Node::as_map_mut) {
            for dids in macs.values_mut().filter_map(Node::as_map_mut) {
                if let Some(index) = dids.shift_remove(did2) {
                    dids.insert(did1.to_string(), index);
                }
            }
        }
    }

    let Some(Node::Map(merged)) = b.remove("device", &[did2]) else {
        return Ok(false);
    };
    if let Some(Node::Map(target)) = b.get_mut("device", &[did1]) {
        merge_maps(target, merged);
    }
    warn!(did = %did2, into = %did1, "delete merged device entry");
    Ok(true)
}

/// Fold `from` into `into`: datalists are united, data and scalars already
/// set are kept, maps merge recursively and arrays are united by equality.
fn merge_maps(into: &mut IndexMap<String, Node>, from: IndexMap<String, Node>) {
    for (key, incoming) in from {
        if let Some(current) = into.get_mut(&key) {
            merge_node(current, incoming);
        } else {
            into.insert(key, incoming);
        }
    }
}

fn merge_node(current: &mut Node, incoming: Node) {
    match (current, incoming) {
        (Node::List(list), Node::List(more)) => list.append(more),
        (Node::Map(map), Node::Map(more)) => merge_maps(map, more),
        (Node::Array(items), Node::Array(more)) => {
            for item in more {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        (Node::Value(Value::Array(items)), Node::Value(Value::Array(more))) => {
            for item in more {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        // Type mismatch, or a leaf already set.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, Ndb};
    use crate::device::helpers::{add_device_ip, add_device_mac, add_device_name, add_device_prop};
    use std::sync::Arc;

    fn build() -> Build {
        Build::new(Arc::new(Ndb::new()), BuildOptions::default())
    }

    #[test]
    fn fex_host_ports() {
        assert!(is_fex_host_port("Ethernet101/1/1"));
        assert!(is_fex_host_port("Ethernet199/1/48"));
        assert!(!is_fex_host_port("Ethernet100/1/1"));
        assert!(!is_fex_host_port("Ethernet1/1"));
        assert!(!is_fex_host_port("GigabitEthernet101/1"));
    }

    #[test]
    fn devices_sharing_a_mac_are_merged() {
        let mut b = build();
        add_device_mac(&mut b, "d1", Some("00:11:22:33:44:55"), Some("eth0"), "x-snmp-if").unwrap();
        add_device_ip(&mut b, "d1", Some("10.0.0.1"), "fping").unwrap();
        add_device_name(&mut b, "d2", Some("sw2"), "cb-resolve").unwrap();
        add_device_mac(&mut b, "d2", Some("00:11:22:33:44:55"), None, "x-snmp-arp-external").unwrap();
        assert_eq!(b.to_resolve().len(), 1);

        try_resolve(&mut b).unwrap();
        assert!(b.to_resolve().is_empty());
        assert!(b.get("device", &["d2"]).is_none());
        let names = b.get("device", &["d1", "name"]).and_then(Node::as_list).unwrap();
        assert_eq!(names.str_values(), vec!["sw2"]);
        assert_eq!(b.ualias_str(&["device", "name", "sw2"]).as_deref(), Some("d1"));
        assert_eq!(b.malias_dids("mac", "00:11:22:33:44:55"), vec!["d1"]);
        assert_eq!(b.malias_dids("name", "sw2"), vec!["d1"]);
    }

    /// Two scans of one switch under different ids. `d2` collides with `d1`
    /// on both its IP and its MAC, queued in the given order.
    fn same_switch_twice(ip_first: bool) -> Build {
        let mut b = build();
        add_device_mac(&mut b, "d1", Some("00:11:22:33:44:55"), Some("eth0"), "x-snmp-if").unwrap();
        add_device_ip(&mut b, "d1", Some("10.0.0.1"), "fping").unwrap();
        add_device_name(&mut b, "d1", Some("sw1"), "x-snmp-sysName").unwrap();
        b.set("rarp", &["10.0.0.7", "00:00:00:00:00:07", "d2"], Node::Value(Value::from(3))).unwrap();
        if ip_first {
            add_device_ip(&mut b, "d2", Some("10.0.0.1"), "x-snmp-ipAdEnt").unwrap();
            add_device_mac(&mut b, "d2", Some("00:11:22:33:44:55"), None, "x-snmp-arp-external").unwrap();
        } else {
            add_device_mac(&mut b, "d2", Some("00:11:22:33:44:55"), None, "x-snmp-arp-external").unwrap();
            add_device_ip(&mut b, "d2", Some("10.0.0.1"), "x-snmp-ipAdEnt").unwrap();
        }
        add_device_prop(&mut b, "d2", &["type"], Some(Value::from("switch")), "x-snmp-sysObjectID").unwrap();
        assert_eq!(b.to_resolve().len(), 2);
        b
    }

    #[test]
    fn merge_outcome_does_not_depend_on_conflict_order() {
        let mut ip_first = same_switch_twice(true);
        let mut mac_first = same_switch_twice(false);
        let Conflict::Add { path, .. } = &ip_first.to_resolve()[0].conflict else {
            panic!("expected an alias conflict");
        };
        assert_eq!(path[1], "ip");
        let Conflict::Add { path, .. } = &mac_first.to_resolve()[0].conflict else {
            panic!("expected an alias conflict");
        };
        assert_eq!(path[1], "mac");

        try_resolve(&mut ip_first).unwrap();
        try_resolve(&mut mac_first).unwrap();

        for b in [&ip_first, &mac_first] {
            assert!(b.to_resolve().is_empty());
            assert!(b.get("device", &["d2"]).is_none());
            assert_eq!(b.get("device", &["d1", "type"]).map(Node::to_plain), Some(Value::from("switch")));
            assert_eq!(b.ualias_str(&["device", "ip", "10.0.0.1"]).as_deref(), Some("d1"));
            assert_eq!(b.malias_dids("mac", "00:11:22:33:44:55"), vec!["d1"]);
        }
        assert_eq!(ip_first.get("device", &["d1"]), mac_first.get("device", &["d1"]));
        for table in ["ualias", "malias", "rarp"] {
            assert_eq!(ip_first.table(table), mac_first.table(table), "{table} differs");
        }
        assert_eq!(
            mac_first.get("rarp", &["10.0.0.7", "00:00:00:00:00:07", "d1"]).map(Node::to_plain),
            Some(Value::from(3))
        );
    }

    #[test]
    fn shared_denylisted_mac_is_no_identity() {
        let mut b = build();
        add_device_mac(&mut b, "d1", Some(SHARED_MAC_DENYLIST[1]), None, "x-snmp-if").unwrap();
        add_device_mac(&mut b, "d2", Some(SHARED_MAC_DENYLIST[1]), None, "x-snmp-if").unwrap();
        try_resolve(&mut b).unwrap();
        assert!(b.get("device", &["d2"]).is_some());
        assert_eq!(b.to_resolve().len(), 1, "conflict replayed and kept");
    }

    #[test]
    fn host_route_on_both_devices_is_a_virtual_ip() {
        let mut b = build();
        for (did, mac) in [("d1", "00:00:00:00:00:01"), ("d2", "00:00:00:00:00:02")] {
            add_device_mac(&mut b, did, Some(mac), None, "x-snmp-if").unwrap();
            let vip = Some(Value::from("10.0.0.254/32"));
            add_device_prop(&mut b, did, &["iface", "Vlan10", "ip"], vip, "x-snmp-ipAdEnt").unwrap();
            add_device_ip(&mut b, did, Some("10.0.0.254"), "x-snmp-ipAdEnt").unwrap();
        }
        try_resolve(&mut b).unwrap();
        assert!(b.to_resolve().is_empty());
        assert!(b.get("device", &["d2"]).is_some());
    }

    #[test]
    fn arp_conflicts_are_replayed_after_merges() {
        let mut b = build();
        b.add_to_resolve(Unresolved {
            comment: "test".to_string(),
            conflict: Conflict::Arp {
                did: "d1".to_string(),
                entry: serde_json::json!({ "ip": "10.0.0.9", "mac": "00:00:00:00:00:09" }),
                table: "x-snmp-arp".to_string(),
                did_from_ip: "d8".to_string(),
                did_from_mac: "d9".to_string(),
            },
        });
        try_resolve(&mut b).unwrap();
        let did = b.ualias_str(&["device", "ip", "10.0.0.9"]).unwrap();
        assert_eq!(b.ualias_str(&["device", "mac", "00:00:00:00:00:09"]), Some(did));
        assert!(b.to_resolve().is_empty());
    }

    #[test]
    fn merge_unites_nested_values() {
        let mut into = IndexMap::new();
        into.insert("route".to_string(), Node::Value(serde_json::json!([1, 2])));
        into.insert("id".to_string(), Node::Data(nscandb_model::Data::new("d1", "x")));
        let mut from = IndexMap::new();
        from.insert("route".to_string(), Node::Value(serde_json::json!([2, 3])));
        from.insert("id".to_string(), Node::Data(nscandb_model::Data::new("d2", "x")));
        from.insert("type".to_string(), Node::from("switch"));
        merge_maps(&mut into, from);
        assert_eq!(into["route"].to_plain(), serde_json::json!([1, 2, 3]));
        assert_eq!(into["id"].to_plain(), serde_json::json!("d1"));
        assert_eq!(into["type"].as_str(), Some("switch"));
    }
}
