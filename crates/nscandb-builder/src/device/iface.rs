//! Interfaces: the SNMP interface table, link aggregation, interface
//! addresses and LLDP local port numbering.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::helpers::{
    add_device_ip, add_device_mac, add_device_prop, add_ifname, ifname, ifname_with_guess,
};
use super::ip::network_prefix;
use crate::build::{field, int, text, Build, DeviceKey};
use crate::error::BuildError;

/// `ifType` of fibre channel ports, whose MACs are not unique across devices.
const IF_TYPE_FIBRE_CHANNEL: i64 = 56;

pub(super) fn if_index_alias(index: &str) -> String {
    format!("_snmp_ifIndex_{index}")
}

/// One end of an aggregation link, before alias resolution.
enum Port {
    Name(String),
    Alias(String),
}

/// `member` belongs to the aggregate `group`, as reported by `origin`.
struct AggLink {
    did: String,
    group: Port,
    member: Port,
    origin: &'static str,
}

pub(super) fn interfaces(b: &mut Build) -> Result<(), BuildError> {
    const T: &str = "x-snmp-if";
    let mut links = Vec::new();

    debug!("process x-snmp-if entries");
    b.for_each2(T, DeviceKey::First, |b, did, _, k2, v| {
        let names: Vec<String> = ["ifDescr", "ifName"].iter().filter_map(|k| text(v, k)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let alias = if_index_alias(k2);
        let Some(name) = add_ifname(b, did, &names, &[alias.as_str()], T)? else {
            return Ok(());
        };
        for (prop, key) in [
            ("description", "ifAlias"),
            ("adminStatus", "ifAdminStatus"),
            ("operStatus", "ifOperStatus"),
            ("speed", "ifSpeed"),
            ("duplex", "duplexStatus"),
        ] {
            add_device_prop(b, did, &["iface", &name, prop], field(v, key).cloned(), T)?;
        }
        if int(v, "ifType") != Some(IF_TYPE_FIBRE_CHANNEL) {
            add_device_mac(b, did, text(v, "ifPhysAddress").as_deref(), Some(&name), T)?;
        }
        if let Some(agg) = text(v, "dot3adAggIfIndex") {
            links.push(AggLink {
                did: did.to_string(),
                group: Port::Alias(if_index_alias(&agg)),
                member: Port::Name(name),
                origin: T,
            });
        }
        Ok(())
    })?;

    debug!("process x-snmp-hwTrunk entries");
    b.for_each2("x-snmp-hwTrunk", DeviceKey::First, |_, did, _, _, v| {
        let Some(group) = text(v, "hwTrunkIfIndex") else {
            return Ok(());
        };
        let members: Vec<&Value> = match v.get("hwTrunkMem") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(Value::Object(items)) => items.values().collect(),
            _ => Vec::new(),
        };
        for member in members.into_iter().filter_map(|m| text(m, "ifIndex")) {
            links.push(AggLink {
                did: did.to_string(),
                group: Port::Alias(if_index_alias(&group)),
                member: Port::Alias(if_index_alias(&member)),
                origin: "x-snmp-hwTrunk",
            });
        }
        Ok(())
    })?;

    debug!("process interfaces aggregates");
    add_aggregates(b, links)
}

/// Resolve link ends to interface names and record both directions:
/// `member` on the aggregate, `memberOf` on the member port.
fn add_aggregates(b: &mut Build, links: Vec<AggLink>) -> Result<(), BuildError> {
    // did → ifname → relation → origin → peers
    type Relations = IndexMap<String, IndexMap<String, IndexMap<&'static str, IndexMap<&'static str, BTreeSet<String>>>>>;
    let mut relations: Relations = IndexMap::new();

    let resolve = |b: &Build, did: &str, port: Port| match port {
        Port::Name(name) => Some(name),
        Port::Alias(alias) => ifname(b, did, &[&alias], Some("cannot compute interface aggregate")),
    };
    for link in links {
        let (Some(group), Some(member)) = (
            resolve(&*b, &link.did, link.group),
            resolve(&*b, &link.did, link.member),
        ) else {
            continue;
        };
        let device = relations.entry(link.did).or_default();
        device
            .entry(group.clone())
            .or_default()
            .entry("member")
            .or_default()
            .entry(link.origin)
            .or_default()
            .insert(member.clone());
        device
            .entry(member)
            .or_default()
            .entry("memberOf")
            .or_default()
            .entry(link.origin)
            .or_default()
            .insert(group);
    }

    for (did, ifaces) in relations {
        for (name, rels) in ifaces {
            for (rel, origins) in rels {
                for (origin, peers) in origins {
                    let value = Value::from(peers.into_iter().collect::<Vec<_>>());
                    add_device_prop(b, &did, &["iface", &name, rel], Some(value), origin)?;
                }
            }
        }
    }
    Ok(())
}

pub(super) fn ip_addresses(b: &mut Build) -> Result<(), BuildError> {
    const T: &str = "x-snmp-ipAdEnt";
    debug!("process x-snmp-ipAdEnt entries");
    b.for_each2(T, DeviceKey::First, |b, did, _, _, v| {
        let Some(ip) = text(v, "ip") else {
            return Ok(());
        };
        if !add_device_ip(b, did, Some(&ip), T)? {
            return Ok(());
        }
        let Some(index) = text(v, "ifIndex") else {
            return Ok(());
        };
        let hint = format!("cannot attach ip address {ip}");
        if let Some(name) = ifname(b, did, &[&if_index_alias(&index)], Some(&hint)) {
            let prefix = network_prefix(text(v, "mask").as_deref());
            let value = Value::from(format!("{ip}/{prefix}"));
            add_device_prop(b, did, &["iface", &name, "ip"], Some(value), T)?;
        }
        Ok(())
    })
}

/// LLDP numbers local ports on its own; map those numbers, and the port ids
/// it advertises, to interfaces.
pub(super) fn lldp_local_ports(b: &mut Build) -> Result<(), BuildError> {
    let hp_port = regex::Regex::new(r"^Port\s+#([0-9]+)$")?;

    debug!("process x-snmp-lldpLocPort entries");
    b.for_each2("x-snmp-lldpLocPort", DeviceKey::First, |b, did, _, _, v| {
        let desc = text(v, "portDesc");
        let port_id = text(v, "portIdDecoded");
        let mut candidates: Vec<String> = desc.iter().chain(port_id.iter()).cloned().collect();
        // Some HP switches describe ports as "Port #5" and name them "Port  5".
        let hp_number = desc
            .as_deref()
            .and_then(|d| hp_port.captures(d))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(n) = &hp_number {
            candidates.push(format!("Port {n:>2}"));
        }
        let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
        let Some(name) = ifname_with_guess(b, did, &candidates, Some("cannot attach lldpLocPort data")) else {
            return Ok(());
        };

        if let Some(num) = text(v, "portNum") {
            let alias = format!("_snmp_lldpPortNum_{num}");
            b.ualias(&["iface", did, alias.as_str()], Value::from(name.as_str()))?;
        }
        if let Some(port_id) = &port_id {
            b.ualias(&["iface", did, port_id.as_str()], Value::from(name.as_str()))?;
        }
        if let (Some(desc), Some(_)) = (&desc, &hp_number) {
            b.ualias(&["iface", did, desc.as_str()], Value::from(name.as_str()))?;
        }
        Ok(())
    })
}
