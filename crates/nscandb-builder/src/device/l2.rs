//! Layer 2 tables: bridge ports, vendor switchport data, vlans and the
//! forwarding database.

use indexmap::IndexMap;
use nscandb_model::{Data, DataList};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::helpers::{add_device_mac, add_swport_prop, ifname};
use super::iface::if_index_alias;
use crate::build::{field, int, text, Build, DeviceKey};
use crate::error::BuildError;

const DOT1Q_VLAN: &str = "x-snmp-dot1qVlan";

fn base_port_alias(port: &str) -> String {
    format!("_snmp_dot1dBasePort_{port}")
}

/// Interface of the record's `ifIndex`.
fn record_ifname(b: &Build, did: &str, v: &Value, hint: &str) -> Option<String> {
    let index = text(v, "ifIndex");
    let found = index
        .as_deref()
        .and_then(|i| ifname(b, did, &[&if_index_alias(i)], Some(hint)));
    if index.is_none() {
        warn!(did = %did, "record without ifIndex, {hint}");
    }
    found
}

/// Copy `fields` of the record into the switchport table, each renamed with
/// `prefix` (`vmVlan` → `ciscoVmVlan`).
fn copy_swport_fields(
    b: &mut Build,
    did: &str,
    ifname: &str,
    v: &Value,
    prefix: &str,
    fields: &[&str],
    origin: &str,
) -> Result<(), BuildError> {
    for key in fields {
        let mut renamed = String::with_capacity(prefix.len() + key.len());
        renamed.push_str(prefix);
        let mut chars = key.chars();
        if let Some(first) = chars.next() {
            renamed.extend(first.to_uppercase());
            renamed.push_str(chars.as_str());
        }
        add_swport_prop(b, did, ifname, &renamed, field(v, key).cloned(), origin)?;
    }
    Ok(())
}

pub(super) fn bridge_ports(b: &mut Build) -> Result<(), BuildError> {
    debug!("process x-snmp-dot1dBasePort entries");
    b.for_each2("x-snmp-dot1dBasePort", DeviceKey::First, |b, did, _, _, v| {
        let port = text(v, "dot1dBasePort").unwrap_or_default();
        let hint = format!("cannot map dot1dBasePort {port}");
        let Some(name) = record_ifname(b, did, v, &hint) else {
            return Ok(());
        };
        b.ualias(&["iface", did, base_port_alias(&port).as_str()], Value::from(name.as_str()))?;
        add_swport_prop(b, did, &name, "dot1qPvid", field(v, "dot1qPvid").cloned(), "x-snmp-dot1dBasePort")?;
        Ok(())
    })?;

    debug!("process x-snmp-cefexBinding entries");
    b.for_each2("x-snmp-cefexBinding", DeviceKey::First, |b, did, k1, _, v| {
        let t = "x-snmp-cefexBinding";
        let (Some(name), Some(fex)) = (record_ifname(b, did, v, "cannot attach cefex data"), text(v, "fexIndex")) else {
            return Ok(());
        };
        add_swport_prop(b, did, &name, "fexIndex", field(v, "fexIndex").cloned(), t)?;
        let fex_name = b
            .ndb()
            .get("x-snmp-cefexName")
            .and_then(|t| t.get(k1))
            .and_then(|t| t.get(&fex))
            .and_then(|r| field(r, "fexName"))
            .cloned();
        add_swport_prop(b, did, &name, "fexName", fex_name, t)?;
        Ok(())
    })?;

    debug!("process x-snmp-stackPort entries");
    b.for_each2("x-snmp-stackPort", DeviceKey::First, |b, did, _, k2, v| {
        let Some(name) = record_ifname(b, did, v, "cannot attach stackPort data") else {
            return Ok(());
        };
        let alias = format!("_snmp_stackPort_{k2}");
        b.ualias(&["iface", did, alias.as_str()], Value::from(name.as_str()))?;
        let status = field(v, "vlanPortIslOperStatus").cloned();
        add_swport_prop(b, did, &name, "ciscoVlanPortIslOperStatus", status, "x-snmp-stackPort")?;
        Ok(())
    })?;

    let vendor_tables: [(&str, &str, &str, &[&str]); 3] = [
        ("x-snmp-vm", "cisco", "cannot attach vmVlan data", &["vmVlanType", "vmVlan", "vmVlansDecoded"]),
        (
            "x-snmp-vlanTrunkPort",
            "cisco",
            "cannot attach vlanTrunkPort data",
            &[
                "vlanTrunkPortVlansEnabledDecoded",
                "vlanTrunkPortNativeVlan",
                "vlanTrunkPortDynamicState",
                "vlanTrunkPortDynamicStatus",
            ],
        ),
        (
            "x-snmp-cisco-smb-vlan",
            "ciscoSmb",
            "cannot attach cisco smb vlan data",
            &[
                "vlanPortModeState",
                "vlanAccessPortModeVlanId",
                "vlanTrunkPortModeNativeVlanId",
                "vlanCustomerPortModeVlanId",
            ],
        ),
    ];
    for (table, prefix, hint, fields) in vendor_tables {
        debug!(table, "process switchport entries");
        b.for_each2(table, DeviceKey::First, |b, did, _, _, v| {
            let Some(name) = record_ifname(b, did, v, hint) else {
                return Ok(());
            };
            copy_swport_fields(b, did, &name, v, prefix, fields, table)
        })?;
    }
    Ok(())
}

pub(super) fn vlans(b: &mut Build) -> Result<(), BuildError> {
    // did → bridge port → swport key → vlan ids
    let mut per_port: IndexMap<String, IndexMap<String, IndexMap<&'static str, Vec<Value>>>> =
        IndexMap::new();

    debug!("process x-snmp-dot1qVlan entries");
    b.for_each2(DOT1Q_VLAN, DeviceKey::First, |b, did, _, _, v| {
        let (Some(vlid), Some(id)) = (text(v, "dot1qVlanIndex"), field(v, "dot1qVlanIndex").cloned()) else {
            return Ok(());
        };
        b.add_immutable_data("device", &[did, "vlan", vlid.as_str(), "id"], Data::new(id.clone(), DOT1Q_VLAN))?;
        let alias = format!("_vlanId_{vlid}");
        b.ualias(&["vlan", did, alias.as_str()], id.clone())?;
        if let Some(fdb_id) = text(v, "dot1qVlanFdbId") {
            let alias = format!("_fdbId_{fdb_id}");
            b.ualias(&["vlan", did, alias.as_str()], id.clone())?;
        }
        if let Some(name) = field(v, "dot1qVlanStaticName") {
            b.add_datalist(
                "device",
                &[did, "vlan", vlid.as_str(), "name"],
                DataList::single(name.clone(), DOT1Q_VLAN),
            )?;
        }
        for (ports_key, swport_key) in [
            ("dot1qVlanCurrentEgressPorts", "dot1qEgressVlans"),
            ("dot1qVlanCurrentUntaggedPorts", "dot1qUntaggedVlans"),
        ] {
            let Some(Value::Array(ports)) = v.get(ports_key) else {
                continue;
            };
            for port in ports.iter().filter_map(nscandb_model::value_to_key) {
                per_port
                    .entry(did.to_string())
                    .or_default()
                    .entry(port)
                    .or_default()
                    .entry(swport_key)
                    .or_default()
                    .push(id.clone());
            }
        }
        Ok(())
    })?;

    debug!("post-process x-snmp-dot1qVlan per port entries");
    for (did, ports) in per_port {
        for (port, kinds) in ports {
            let alias = base_port_alias(&port);
            let Some(name) = ifname(b, &did, &[&alias], Some("cannot attach dot1qVlan per port data")) else {
                continue;
            };
            for (key, vlan_ids) in kinds {
                add_swport_prop(b, &did, &name, key, Some(Value::from(vlan_ids)), DOT1Q_VLAN)?;
            }
        }
    }

    debug!("process x-snmp-vtpVlan entries");
    b.for_each2("x-snmp-vtpVlan", DeviceKey::First, |b, did, _, _, v| {
        let t = "x-snmp-vtpVlan";
        // 1002-1005 are the FDDI and Token Ring defaults every VTP switch has.
        let Some(vlan_id) = int(v, "vlanId").filter(|id| !(1002..=1005).contains(id)) else {
            return Ok(());
        };
        let key = vlan_id.to_string();
        b.add_immutable_data("device", &[did, "vlan", key.as_str(), "id"], Data::new(vlan_id, t))?;
        if let Some(name) = field(v, "vlanName") {
            b.add_datalist("device", &[did, "vlan", key.as_str(), "name"], DataList::single(name.clone(), t))?;
        }
        Ok(())
    })
}

pub(super) fn fdb(b: &mut Build) -> Result<(), BuildError> {
    debug!("process cb-snmp-cisco-fdb entries");
    b.for_each2("cb-snmp-cisco-fdb", DeviceKey::First, |b, did, _, _, v| {
        let t = "cb-snmp-cisco-fdb";
        let Some(name) = base_port_ifname(b, did, v) else {
            return Ok(());
        };
        add_fdb_entry(b, did, &name, text(v, "mac").as_deref(), field(v, "vlan").cloned(), t)
    })?;

    debug!("process x-snmp-dot1qTpFdb entries");
    b.for_each2("x-snmp-dot1qTpFdb", DeviceKey::First, |b, did, _, _, v| {
        let t = "x-snmp-dot1qTpFdb";
        let name = base_port_ifname(b, did, v);
        let fdb_id = text(v, "dot1qFdbId").unwrap_or_default();
        let alias = format!("_fdbId_{fdb_id}");
        let vlid = b.ualias_get(&["vlan", did, alias.as_str()]).cloned();
        if vlid.is_none() {
            warn!(did = %did, alias = %alias, "no vlanId matching alias, cannot attach fdb data");
        }
        let (Some(name), Some(vlid)) = (name, vlid) else {
            return Ok(());
        };
        add_fdb_entry(b, did, &name, text(v, "mac").as_deref(), Some(vlid), t)
    })?;

    debug!("process x-snmp-dot1dTpFdb entries");
    b.for_each2("x-snmp-dot1dTpFdb", DeviceKey::First, |b, did, k1, _, v| {
        // dot1q data supersedes dot1d on the same device.
        if b.ndb().get("x-snmp-dot1qTpFdb").and_then(|t| t.get(k1)).is_some() {
            return Ok(());
        }
        let Some(name) = base_port_ifname(b, did, v) else {
            return Ok(());
        };
        add_fdb_entry(b, did, &name, text(v, "mac").as_deref(), None, "x-snmp-dot1dTpFdb")
    })
}

fn base_port_ifname(b: &Build, did: &str, v: &Value) -> Option<String> {
    let port = text(v, "dot1dBasePort")?;
    ifname(b, did, &[&base_port_alias(&port)], Some("cannot attach fdb data"))
}

/// Record `mac` as learned on `did`/`ifname`, creating a device for an
/// unknown MAC.
fn add_fdb_entry(
    b: &mut Build,
    did: &str,
    ifname: &str,
    mac: Option<&str>,
    vlan: Option<Value>,
    table: &str,
) -> Result<(), BuildError> {
    let Some(mac) = mac else {
        return Ok(());
    };
    if b.ualias_str(&["device", "mac", mac]).is_none() {
        debug!(did = %did, mac = %mac, "fdb entry matches no device, add new");
        let external = format!("{table}-external");
        let new_did = b.add_device("mac", mac, &external)?;
        add_device_mac(b, &new_did, Some(mac), None, &external)?;
    }

    let (entry, rentry) = match vlan {
        Some(vlan) => (
            json!({ "mac": mac, "vlan": vlan }),
            json!({ "did": did, "ifname": ifname, "vlan": vlan }),
        ),
        None => (json!({ "mac": mac }), json!({ "did": did, "ifname": ifname })),
    };
    b.add_datalist("fdb", &[did, ifname], DataList::single(entry, table))?;
    b.add_datalist("rfdb", &[mac], DataList::single(rentry, table))?;
    Ok(())
}
