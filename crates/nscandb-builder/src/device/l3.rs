//! Layer 3 tables: routes, ARP and the reverse ARP index.

use std::collections::HashSet;

use nscandb_model::{value_to_key, Node};
use serde_json::{Map, Value};
use tracing::debug;

use super::helpers::{add_device_ip, add_device_mac, add_device_prop, device_ips, iface_ips_prefix, ifname};
use super::iface::if_index_alias;
use super::ip::{broadcast_ip, is_bad_device_ip, network_prefix};
use crate::build::{field, int, text, Build, Conflict, DeviceKey, Unresolved};
use crate::error::BuildError;

pub(super) fn routes(b: &mut Build) -> Result<(), BuildError> {
    for table in ["x-snmp-ipRoute", "x-snmp-inetCidrRoute"] {
        debug!(table, "process route entries");
        b.for_each2(table, DeviceKey::First, |b, did, _, _, v| add_route(b, did, v, table))?;
    }

    debug!("process x-snmp-netDefaultGateway entries");
    b.for_each1("x-snmp-netDefaultGateway", |b, did, _, v| {
        let mut route = Map::new();
        route.insert("dest".to_string(), Value::from("0.0.0.0/0"));
        if let Some(gw) = field(v, "netDefaultGateway") {
            route.insert("via".to_string(), gw.clone());
        }
        add_device_prop(b, did, &["route"], Some(Value::Object(route)), "x-snmp-netDefaultGateway")?;
        Ok(())
    })
}

/// Routes to the device itself, to one of its broadcast addresses or to
/// unusable destinations are dropped; the default route is kept.
fn add_route(b: &mut Build, did: &str, v: &Value, table: &str) -> Result<(), BuildError> {
    let ips = device_ips(b, did);
    let broadcasts: HashSet<String> = iface_ips_prefix(b, did)
        .iter()
        .filter_map(|(ip, prefix)| broadcast_ip(ip, *prefix))
        .collect();

    let mut route = Map::new();
    if let Some(dest) = text(v, "dest").filter(|d| !d.is_empty()) {
        let prefix = match (int(v, "pfxLen"), text(v, "mask")) {
            (Some(len), _) => match u32::try_from(len) {
                Ok(len) => len,
                Err(_) => return Ok(()),
            },
            (None, Some(mask)) => network_prefix(Some(&mask)),
            (None, None) => return Ok(()),
        };
        let default_route = dest == "0.0.0.0" && prefix == 0;
        if (!default_route && is_bad_device_ip(&dest, Some(prefix)))
            || ips.contains(&dest)
            || broadcasts.contains(&dest)
        {
            return Ok(());
        }
        route.insert("dest".to_string(), Value::from(format!("{dest}/{prefix}")));
    }
    if let Some(hop) = text(v, "nextHop").filter(|h| !h.is_empty() && h != "0.0.0.0" && !ips.contains(h)) {
        route.insert("via".to_string(), Value::from(hop));
    }
    if let Some(metric) = field(v, "metric1") {
        route.insert("metric".to_string(), metric.clone());
    }
    if let Some(index) = text(v, "ifIndex") {
        if let Some(name) = ifname(b, did, &[&if_index_alias(&index)], Some("cannot complete route entry")) {
            route.insert("iface".to_string(), Value::from(name));
        }
    }
    add_device_prop(b, did, &["route"], Some(Value::Object(route)), table)?;
    Ok(())
}

pub(super) fn arp(b: &mut Build) -> Result<(), BuildError> {
    const T: &str = "x-snmp-arp";
    let mut delayed: Vec<(String, Value)> = Vec::new();

    debug!("process x-snmp-arp entries, pass 1");
    b.for_each2(T, DeviceKey::First, |b, did, _, _, v| {
        if let (Some(ip), Some(mac), Some(index)) =
            (text(v, "ip"), text(v, "mac"), int(v, "ifIndex").filter(|i| *i != 0))
        {
            b.set("rarp", &[ip.as_str(), mac.as_str(), did], Node::Value(Value::from(index)))?;
        }
        if !process_arp_entry(b, did, v, T, true)? {
            delayed.push((did.to_string(), v.clone()));
        }
        Ok(())
    })?;

    debug!(delayed = delayed.len(), "process x-snmp-arp entries, pass 2");
    for (did, v) in delayed {
        process_arp_entry(b, &did, &v, T, false)?;
    }
    Ok(())
}

/// Link the IP and MAC of an ARP entry to the device that already owns one
/// of them. With `delay_new_devices`, an entry matching no device is left for
/// a later pass and `false` is returned.
pub(super) fn process_arp_entry(
    b: &mut Build,
    did: &str,
    entry: &Value,
    table: &str,
    delay_new_devices: bool,
) -> Result<bool, BuildError> {
    let (Some(ip), Some(mac)) = (text(entry, "ip"), text(entry, "mac")) else {
        return Ok(true);
    };
    let from_ip = b.ualias_str(&["device", "ip", ip.as_str()]);
    let from_mac = b.ualias_str(&["device", "mac", mac.as_str()]);
    if !is_arp_acceptable(b, &ip, from_mac.as_deref()) {
        return Ok(true);
    }

    let external = format!("{table}-external");
    match (from_ip, from_mac) {
        (Some(from_ip), Some(from_mac)) => {
            if from_ip != from_mac {
                b.add_to_resolve(Unresolved {
                    comment: format!(
                        "arp entry on did {did}, ip={ip} did {from_ip}, mac={mac} did {from_mac}"
                    ),
                    conflict: Conflict::Arp {
                        did: did.to_string(),
                        entry: entry.clone(),
                        table: table.to_string(),
                        did_from_ip: from_ip,
                        did_from_mac: from_mac,
                    },
                });
            }
        }
        (Some(from_ip), None) => {
            debug!(did = %did, ip = %ip, found = %from_ip, mac = %mac, "arp entry matches device by ip, add mac");
            add_device_mac(b, &from_ip, Some(&mac), None, &external)?;
        }
        (None, Some(from_mac)) => {
            debug!(did = %did, mac = %mac, found = %from_mac, ip = %ip, "arp entry matches device by mac, add ip");
            add_device_ip(b, &from_mac, Some(&ip), &external)?;
        }
        (None, None) => {
            if delay_new_devices {
                debug!(did = %did, ip = %ip, mac = %mac, "arp entry matches no device, delay processing");
                return Ok(false);
            }
            debug!(did = %did, ip = %ip, mac = %mac, "arp entry matches no device, add new");
            let new_did = b.add_device("ip", &ip, &external)?;
            add_device_ip(b, &new_did, Some(&ip), &external)?;
            add_device_mac(b, &new_did, Some(&mac), None, &external)?;
        }
    }
    Ok(true)
}

/// Reject unusable addresses, and entries that would add an address to a
/// device whose addresses are all known from its own address table (proxy
/// ARP answers with the router MAC for foreign addresses).
fn is_arp_acceptable(b: &Build, ip: &str, did_from_mac: Option<&str>) -> bool {
    if is_bad_device_ip(ip, None) || ip.starts_with("169.254.") {
        return false;
    }
    let complete = did_from_mac
        .and_then(|did| b.get("device", &[did, "ip"]))
        .and_then(Node::as_list)
        .is_some_and(|ips| ips.has_origin("x-snmp-ipAdEnt"));
    !complete
}

/// Replace `rarp.<ip>.<mac>.<did>` ifIndex values with interface names;
/// entries whose interface is unknown are removed.
pub(super) fn resolve_rarp(b: &mut Build) -> Result<(), BuildError> {
    let mut entries = Vec::new();
    if let Some(rarp) = b.table("rarp").and_then(Node::as_map) {
        for (ip, macs) in rarp {
            for (mac, dids) in macs.as_map().into_iter().flatten() {
                for (did, index) in dids.as_map().into_iter().flatten() {
                    let index = index.as_value().and_then(value_to_key);
                    entries.push((ip.clone(), mac.clone(), did.clone(), index));
                }
            }
        }
    }

    for (ip, mac, did, index) in entries {
        let path = [ip.as_str(), mac.as_str(), did.as_str()];
        let hint = format!("cannot resolve rarp ifIndex, {}", path.join("."));
        match index.and_then(|i| ifname(b, &did, &[&if_index_alias(&i)], Some(&hint))) {
            Some(name) => b.set("rarp", &path, Node::from(name))?,
            None => {
                b.remove("rarp", &path);
            }
        }
    }
    Ok(())
}
