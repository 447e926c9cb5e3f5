//! LLDP and CDP remote tables: pin each advertised neighbor to a device and
//! an interface, creating them when nothing matches.

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use super::helpers::{
    add_device_ip, add_device_mac, add_device_name, add_device_prop, add_ifname, iface_from_mac, ifname,
    ifname_with_guess, split_port_suffix,
};
use super::identity::add_capabilities;
use super::iface::if_index_alias;
use crate::build::{field, int, text, Build, Conflict, DeviceKey, Unresolved};
use crate::error::BuildError;

const LLDP_EXTERNAL: &str = "x-snmp-lldpRem-external";
const CDP_EXTERNAL: &str = "x-snmp-cdpCache-external";

/// IP phones name themselves `SEP<MAC>`, the MAC in uppercase hex.
const PHONE_NAME: &str = r"^SEP[0-9A-F]{12}$";

/// `001122aabbcc` → `00:11:22:aa:bb:cc`
fn colon_mac(hex: &str) -> String {
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_lowercase())
        .collect::<Vec<_>>()
        .join(":")
}

fn phone_mac(phone_name: &Regex, name: &str) -> Option<String> {
    phone_name.is_match(name).then(|| colon_mac(&name[3..]))
}

/// Device id agreed on by the independent identity signals of one entry.
#[derive(Default)]
struct Identity {
    did: Option<String>,
    source: &'static str,
}

impl Identity {
    /// Fold in the devices one signal matches. Several matches, or a match
    /// disagreeing with an earlier signal, is an ambiguity.
    fn confirm(&mut self, dids: Vec<String>, source: &'static str) -> Result<(), String> {
        match dids.as_slice() {
            [] => Ok(()),
            [did] => match &self.did {
                Some(current) if current != did => Err(format!(
                    "{source} did {did} conflicts with did {current} from {}",
                    self.source
                )),
                Some(_) => Ok(()),
                None => {
                    self.did = Some(did.clone());
                    self.source = source;
                    Ok(())
                }
            },
            _ => Err(format!("could not confirm nei did from {source} between {dids:?}")),
        }
    }
}

struct Entry<'a> {
    protocol: &'static str,
    did: &'a str,
    ifname: &'a str,
    record: &'a Value,
}

impl Entry<'_> {
    fn defer(&self, b: &mut Build, message: &str) {
        b.add_to_resolve(Unresolved {
            comment: format!(
                "{} nei entry on did {} ifname {}, {message}",
                self.protocol, self.did, self.ifname
            ),
            conflict: Conflict::Neighbor {
                protocol: self.protocol.to_string(),
                did: self.did.to_string(),
                ifname: self.ifname.to_string(),
                entry: self.record.clone(),
            },
        });
    }

    fn add_neighbor(&self, b: &mut Build, nei_did: &str, nei_ifname: &str, origin: &str) -> Result<(), BuildError> {
        let entry = json!({ "id": nei_did, "ifname": nei_ifname });
        b.add_datalist("nei", &[self.did, self.ifname], nscandb_model::DataList::single(entry, origin))
    }
}

// ============================================================================
// LLDP
// ============================================================================

pub(super) fn lldp(b: &mut Build) -> Result<(), BuildError> {
    let phone_name = Regex::new(PHONE_NAME)?;
    debug!("process x-snmp-lldpRem entries");
    b.for_each2("x-snmp-lldpRem", DeviceKey::First, |b, did, _, _, v| {
        let port_num = text(v, "localPortNum").unwrap_or_default();
        let alias = format!("_snmp_lldpPortNum_{port_num}");
        let Some(name) = ifname(b, did, &[&alias], Some("cannot attach lldpRem data")) else {
            return Ok(());
        };
        let entry = Entry { protocol: "lldp", did, ifname: &name, record: v };
        lldp_entry(b, &entry, &phone_name)
    })
}

fn lldp_entry(b: &mut Build, entry: &Entry<'_>, phone_name: &Regex) -> Result<(), BuildError> {
    let o = entry.record;
    let sys_name = text(o, "sysName");
    let sys_name_mac = sys_name.as_deref().and_then(|n| phone_mac(phone_name, n));
    let chassis = text(o, "chassisIdDecoded");
    let chassis_subtype = int(o, "chassisIdSubtype");
    let (chassis_mac, chassis_ip) = match chassis_subtype {
        Some(4) => (chassis.clone(), None),
        Some(5) => (None, chassis.clone()),
        _ => (None, None),
    };
    let man_addr = text(o, "manAddr");

    let mut identity = Identity::default();
    let mut signals: Vec<(Vec<String>, &'static str)> = Vec::new();
    if let Some(mac) = &chassis_mac {
        signals.push((b.malias_dids("mac", mac), "chassis (subtypes mac, ip)"));
    }
    if let Some(ip) = &chassis_ip {
        signals.push((b.malias_dids("ip", ip), "chassis (subtypes mac, ip)"));
    }
    if let Some(mac) = &sys_name_mac {
        signals.push((b.malias_dids("mac", mac), "sysNameMac"));
    }
    if let Some(ip) = &man_addr {
        signals.push((b.malias_dids("ip", ip), "manAddr"));
    }
    for (dids, source) in signals {
        if let Err(message) = identity.confirm(dids, source) {
            entry.defer(b, &message);
            return Ok(());
        }
    }

    // Names are the least unique signal, only tried when nothing else matched.
    if identity.did.is_none() {
        let mut signals = Vec::new();
        if let (Some(name), Some(7)) = (&chassis, chassis_subtype) {
            signals.push((b.malias_dids("name", name), "chassis (subtype local)"));
        }
        if let Some(name) = &sys_name {
            signals.push((b.malias_dids("name", name), "sysName"));
        }
        for (dids, source) in signals {
            if let Err(message) = identity.confirm(dids, source) {
                entry.defer(b, &message);
                return Ok(());
            }
        }
    }

    let nei_did = match identity.did {
        Some(did) => did,
        None => match (&chassis_mac, &chassis_ip, &man_addr) {
            (Some(mac), _, _) => b.add_device("mac", mac, LLDP_EXTERNAL)?,
            (None, Some(ip), _) | (None, None, Some(ip)) => b.add_device("ip", ip, LLDP_EXTERNAL)?,
            (None, None, None) => {
                entry.defer(b, "not enough data to get a device");
                return Ok(());
            }
        },
    };

    add_device_mac(b, &nei_did, chassis_mac.as_deref(), None, LLDP_EXTERNAL)?;
    add_device_mac(b, &nei_did, sys_name_mac.as_deref(), None, LLDP_EXTERNAL)?;
    add_device_ip(b, &nei_did, chassis_ip.as_deref(), LLDP_EXTERNAL)?;
    add_device_ip(b, &nei_did, man_addr.as_deref(), LLDP_EXTERNAL)?;
    add_device_name(b, &nei_did, sys_name.as_deref(), LLDP_EXTERNAL)?;
    add_device_prop(b, &nei_did, &["description"], field(o, "sysDesc").cloned(), LLDP_EXTERNAL)?;
    add_capabilities(b, &nei_did, o.get("sysCapEnabledNames"), LLDP_EXTERNAL)?;

    let port_id = text(o, "portIdDecoded");
    let port_desc = text(o, "portDesc");
    let port_mac = port_id.clone().filter(|_| int(o, "portIdSubtype") == Some(3));

    let mut nei_ifname = port_mac.as_deref().and_then(|mac| iface_from_mac(b, &nei_did, mac));
    if nei_ifname.is_none() {
        let candidates: Vec<&str> = port_id.iter().chain(port_desc.iter()).map(String::as_str).collect();
        nei_ifname = ifname_with_guess(b, &nei_did, &candidates, None);
    }
    let nei_ifname = match nei_ifname {
        Some(name) => name,
        None => {
            let Some(names) = remote_port_names(port_mac.is_some(), port_id.as_deref(), port_desc.as_deref()) else {
                entry.defer(b, &format!("nei did {nei_did}, cannot build a name to add an interface"));
                return Ok(());
            };
            let Some(added) = add_ifname(b, &nei_did, &names, &[], LLDP_EXTERNAL)? else {
                return Ok(());
            };
            let description = port_desc.as_deref().filter(|d| *d != names[0]).map(Value::from);
            add_device_prop(b, &nei_did, &["iface", &added, "description"], description, LLDP_EXTERNAL)?;
            added
        }
    };
    add_device_mac(b, &nei_did, port_mac.as_deref(), Some(&nei_ifname), LLDP_EXTERNAL)?;

    entry.add_neighbor(b, &nei_did, &nei_ifname, "x-snmp-lldpRem")
}

/// Names for a remote port no interface matches. When the port id and
/// description end with the same port number, the longer one is the name
/// and the other an alternate (`Gi1/0/1` and `GigabitEthernet1/0/1`).
fn remote_port_names<'a>(by_mac: bool, port_id: Option<&'a str>, port_desc: Option<&'a str>) -> Option<Vec<&'a str>> {
    if by_mac {
        if let Some(desc) = port_desc {
            return Some(vec![desc]);
        }
    }
    if let (Some(id), Some(desc)) = (port_id, port_desc) {
        let same_suffix = matches!(
            (split_port_suffix(id), split_port_suffix(desc)),
            (Some((_, a)), Some((_, b))) if a == b
        );
        if same_suffix && desc.len() > id.len() {
            return Some(vec![desc, id]);
        }
    }
    port_id.filter(|id| !id.is_empty()).map(|id| vec![id])
}

// ============================================================================
// CDP
// ============================================================================

pub(super) fn cdp(b: &mut Build) -> Result<(), BuildError> {
    let phone_name = Regex::new(PHONE_NAME)?;
    debug!("process x-snmp-cdpCache entries");
    b.for_each2("x-snmp-cdpCache", DeviceKey::First, |b, did, _, _, v| {
        let index = text(v, "ifIndex").unwrap_or_default();
        let Some(name) = ifname(b, did, &[&if_index_alias(&index)], Some("cannot attach cdpCache data")) else {
            return Ok(());
        };
        let entry = Entry { protocol: "cdp", did, ifname: &name, record: v };
        cdp_entry(b, &entry, &phone_name)
    })
}

fn cdp_entry(b: &mut Build, entry: &Entry<'_>, phone_name: &Regex) -> Result<(), BuildError> {
    let o = entry.record;
    let mut identity = Identity::default();

    let ip = text(o, "cdpCacheAddressDecoded").filter(|_| int(o, "cdpCacheAddressType") == Some(1));
    if let Some(ip) = &ip {
        if let Err(message) = identity.confirm(b.malias_dids("ip", ip), "cdpCacheAddress") {
            entry.defer(b, &message);
            return Ok(());
        }
    }

    let device_id = text(o, "cdpCacheDeviceId");
    let (mac, name) = match device_id.as_deref() {
        // Cisco SMB reports its MAC as 12 lowercase hex digits.
        Some(id) if id.len() == 12 && id.is_ascii() && id.to_lowercase() == id => (Some(colon_mac(id)), None),
        Some(id) => match phone_mac(phone_name, id) {
            Some(mac) => (Some(mac), Some(id.to_string())),
            None => (None, Some(id.to_string())),
        },
        None => (None, None),
    };

    if identity.did.is_none() {
        let dids = match (&mac, &name) {
            (Some(mac), _) => b.malias_dids("mac", mac),
            (None, Some(name)) => b.malias_dids("name", name),
            (None, None) => Vec::new(),
        };
        if let Err(message) = identity.confirm(dids, "cdpCacheDeviceId") {
            entry.defer(b, &message);
            return Ok(());
        }
    }

    let nei_did = match identity.did {
        Some(did) => did,
        None => match (&mac, &ip) {
            (Some(mac), _) => b.add_device("mac", mac, CDP_EXTERNAL)?,
            (None, Some(ip)) => b.add_device("ip", ip, CDP_EXTERNAL)?,
            (None, None) => {
                entry.defer(b, "not enough data to get a device");
                return Ok(());
            }
        },
    };

    add_device_mac(b, &nei_did, mac.as_deref(), None, CDP_EXTERNAL)?;
    add_device_ip(b, &nei_did, ip.as_deref(), CDP_EXTERNAL)?;
    add_device_name(b, &nei_did, name.as_deref(), CDP_EXTERNAL)?;
    add_device_prop(b, &nei_did, &["type"], field(o, "cdpCachePlatform").cloned(), CDP_EXTERNAL)?;
    add_device_prop(b, &nei_did, &["description"], field(o, "cdpCacheVersion").cloned(), CDP_EXTERNAL)?;
    add_capabilities(b, &nei_did, o.get("cdpCacheCapabilitiesNames"), CDP_EXTERNAL)?;

    let Some(port) = text(o, "cdpCacheDevicePort") else {
        entry.defer(b, &format!("nei did {nei_did}, no remote port to add an interface"));
        return Ok(());
    };
    let nei_ifname = match ifname_with_guess(b, &nei_did, &[&port], None) {
        Some(name) => Some(name),
        None => add_ifname(b, &nei_did, &[&port], &[], CDP_EXTERNAL)?,
    };
    let Some(nei_ifname) = nei_ifname else {
        return Ok(());
    };
    entry.add_neighbor(b, &nei_did, &nei_ifname, "x-snmp-cdpCache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macs_from_names() {
        let re = Regex::new(PHONE_NAME).unwrap();
        assert_eq!(phone_mac(&re, "SEP00AABBCCDDEE").as_deref(), Some("00:aa:bb:cc:dd:ee"));
        assert_eq!(phone_mac(&re, "SEP00aabbccddee"), None);
        assert_eq!(phone_mac(&re, "sw1"), None);
        assert_eq!(colon_mac("001122aabbcc"), "00:11:22:aa:bb:cc");
    }

    #[test]
    fn identity_signals_must_agree() {
        let mut id = Identity::default();
        id.confirm(vec![], "chassis").unwrap();
        assert!(id.did.is_none());
        id.confirm(vec!["d1".into()], "chassis").unwrap();
        id.confirm(vec!["d1".into()], "manAddr").unwrap();
        let err = id.confirm(vec!["d2".into()], "sysNameMac").unwrap_err();
        assert_eq!(err, "sysNameMac did d2 conflicts with did d1 from chassis");
        let err = Identity::default()
            .confirm(vec!["d1".into(), "d2".into()], "manAddr")
            .unwrap_err();
        assert!(err.starts_with("could not confirm nei did from manAddr"));
    }

    #[test]
    fn remote_port_naming() {
        assert_eq!(
            remote_port_names(false, Some("Gi1/0/1"), Some("GigabitEthernet1/0/1")),
            Some(vec!["GigabitEthernet1/0/1", "Gi1/0/1"])
        );
        assert_eq!(remote_port_names(false, Some("Gi1/0/1"), Some("uplink")), Some(vec!["Gi1/0/1"]));
        assert_eq!(
            remote_port_names(true, Some("00:11:22:33:44:55"), Some("eth0")),
            Some(vec!["eth0"])
        );
        assert_eq!(remote_port_names(false, None, Some("eth0")), None);
    }
}
