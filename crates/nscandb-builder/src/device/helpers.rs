//! Device and interface write helpers shared by the device stage.
//!
//! Every `add_*` helper accepts an absent value and then does nothing, which
//! keeps callers free of presence checks for optional record fields.

use std::collections::HashMap;

use nscandb_model::{DataList, Node};
use serde_json::Value;
use tracing::warn;

use super::ip::{is_bad_device_ip, strip_prefix_len};
use crate::build::Build;
use crate::error::BuildError;

pub(crate) fn add_device_ip(
    b: &mut Build,
    did: &str,
    ip: Option<&str>,
    origin: &str,
) -> Result<bool, BuildError> {
    let Some(ip) = ip.filter(|ip| !is_bad_device_ip(ip, None)) else {
        return Ok(false);
    };
    b.add_datalist("device", &[did, "ip"], DataList::single(ip, origin))?;
    b.ualias(&["device", "ip", ip], Value::from(did))?;
    b.malias(&["device", "ip", ip], did)?;
    Ok(true)
}

pub(crate) fn add_device_name(
    b: &mut Build,
    did: &str,
    name: Option<&str>,
    origin: &str,
) -> Result<bool, BuildError> {
    let Some(name) = name else {
        return Ok(false);
    };
    b.add_datalist("device", &[did, "name"], DataList::single(name, origin))?;
    b.ualias(&["device", "name", name], Value::from(did))?;
    b.malias(&["device", "name", name], did)?;
    Ok(true)
}

/// Device MAC, also recorded on `ifname` when given.
pub(crate) fn add_device_mac(
    b: &mut Build,
    did: &str,
    mac: Option<&str>,
    ifname: Option<&str>,
    origin: &str,
) -> Result<bool, BuildError> {
    let Some(mac) = mac else {
        return Ok(false);
    };
    b.add_datalist("device", &[did, "mac"], DataList::single(mac, origin))?;
    b.ualias(&["device", "mac", mac], Value::from(did))?;
    b.malias(&["device", "mac", mac], did)?;
    if let Some(ifname) = ifname {
        b.add_datalist("device", &[did, "iface", ifname, "mac"], DataList::single(mac, origin))?;
    }
    Ok(true)
}

/// `device.<did>.<path>` datalist entry.
pub(crate) fn add_device_prop(
    b: &mut Build,
    did: &str,
    path: &[&str],
    value: Option<Value>,
    origin: &str,
) -> Result<bool, BuildError> {
    let Some(value) = value else {
        return Ok(false);
    };
    let mut full = Vec::with_capacity(path.len() + 1);
    full.push(did);
    full.extend_from_slice(path);
    b.add_datalist("device", &full, DataList::single(value, origin))?;
    Ok(true)
}

/// Raw switchport property, normalized later.
pub(crate) fn add_swport_prop(
    b: &mut Build,
    did: &str,
    ifname: &str,
    key: &str,
    value: Option<Value>,
    origin: &str,
) -> Result<bool, BuildError> {
    let Some(value) = value else {
        return Ok(false);
    };
    b.add_datalist("swport", &[did, ifname, key], DataList::single(value, origin))?;
    Ok(true)
}

// ============================================================================
// Interface names
// ============================================================================

/// Interface name behind the first known alias.
pub(crate) fn ifname(b: &Build, did: &str, aliases: &[&str], failure_hint: Option<&str>) -> Option<String> {
    let found = aliases
        .iter()
        .find_map(|alias| b.ualias_str(&["iface", did, *alias]));
    if found.is_none() {
        if let Some(hint) = failure_hint {
            warn!(did = %did, aliases = ?aliases, "no interface matching alias, {hint}");
        }
    }
    found
}

/// Like [`ifname`], also trying the long and short spellings vendors use for
/// the same port (`Gi1/0/1`, `GigabitEthernet1/0/1`).
pub(crate) fn ifname_with_guess(
    b: &Build,
    did: &str,
    aliases: &[&str],
    failure_hint: Option<&str>,
) -> Option<String> {
    let expanded = guess_aliases(aliases);
    let refs: Vec<&str> = expanded.iter().map(String::as_str).collect();
    ifname(b, did, &refs, failure_hint)
}

pub(crate) fn guess_aliases(aliases: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = aliases.iter().map(|a| a.to_string()).collect();
    for alias in aliases {
        let Some((prefix, suffix)) = split_port_suffix(alias) else {
            continue;
        };
        let spellings: &[&str] = match prefix.to_lowercase().as_str() {
            "fa" => &["FastEthernet", "Fa"],
            "gi" => &["GigabitEthernet", "Gi"],
            "te" => &["TenGigabitEthernet", "Te", "10GE"],
            "twe" => &["TwentyFiveGigE", "Twe"],
            "fo" => &["FortyGigabitEthernet", "Fo", "40GE"],
            "hu" => &["HundredGigabitEthernet", "Hu", "100GE"],
            "po" => &["Port-Channel", "port-channel", "Po"],
            _ => &[],
        };
        out.extend(spellings.iter().map(|s| format!("{s}{suffix}")));
    }
    out
}

/// Split `Gi1/0/1` into `("Gi", "1/0/1")`: the suffix is the trailing run of
/// digits, `/` and `.`.
pub(crate) fn split_port_suffix(name: &str) -> Option<(&str, &str)> {
    let start = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '/' || *c == '.')
        .last()
        .map(|(i, _)| i)?;
    Some(name.split_at(start))
}

/// Register interface names and aliases, returning the interface they
/// resolve to. The first name becomes the interface key unless one of the
/// names or aliases is already known.
pub(crate) fn add_ifname(
    b: &mut Build,
    did: &str,
    names: &[&str],
    aliases: &[&str],
    origin: &str,
) -> Result<Option<String>, BuildError> {
    let known: Vec<&str> = names.iter().chain(aliases).copied().collect();
    let mut resolved = ifname(b, did, &known, None);
    for name in names {
        let target = resolved.get_or_insert_with(|| name.to_string()).clone();
        b.add_datalist("device", &[did, "iface", target.as_str(), "name"], DataList::single(*name, origin))?;
        b.ualias(&["iface", did, *name], Value::from(target))?;
    }
    if let Some(target) = &resolved {
        for alias in aliases {
            b.ualias(&["iface", did, *alias], Value::from(target.as_str()))?;
        }
    }
    Ok(resolved)
}

/// Interface whose `mac` datalist holds `mac`.
pub(crate) fn iface_from_mac(b: &Build, did: &str, mac: &str) -> Option<String> {
    let ifaces = b.get("device", &[did, "iface"])?.as_map()?;
    let mac = Value::from(mac);
    ifaces
        .iter()
        .find(|(_, iface)| {
            iface
                .get("mac")
                .and_then(Node::as_list)
                .is_some_and(|l| l.contains_value(&mac))
        })
        .map(|(name, _)| name.clone())
}

// ============================================================================
// Address lookups
// ============================================================================

/// Device addresses, duplicates across origins included.
pub(crate) fn device_ips(b: &Build, did: &str) -> Vec<String> {
    b.get("device", &[did, "ip"])
        .and_then(Node::as_list)
        .map(|l| l.str_values().into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Interface addresses keyed by bare address, with their prefix length.
pub(crate) fn iface_ips_prefix(b: &Build, did: &str) -> HashMap<String, u32> {
    let mut out = HashMap::new();
    let Some(ifaces) = b.get("device", &[did, "iface"]).and_then(Node::as_map) else {
        return out;
    };
    for iface in ifaces.values() {
        let Some(ips) = iface.get("ip").and_then(Node::as_list) else {
            continue;
        };
        for ip in ips.str_values() {
            let prefix = ip
                .split_once('/')
                .and_then(|(_, len)| len.parse().ok())
                .unwrap_or(32);
            out.insert(strip_prefix_len(ip).to_string(), prefix);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, Ndb};
    use std::sync::Arc;

    fn build() -> Build {
        Build::new(Arc::new(Ndb::new()), BuildOptions::default())
    }

    #[test]
    fn port_suffix_split() {
        assert_eq!(split_port_suffix("Gi1/0/1"), Some(("Gi", "1/0/1")));
        assert_eq!(split_port_suffix("Port-channel10"), Some(("Port-channel", "10")));
        assert_eq!(split_port_suffix("eth"), None);
        assert_eq!(split_port_suffix("42"), Some(("", "42")));
    }

    #[test]
    fn guessed_spellings() {
        let out = guess_aliases(&["te1/1", "mgmt0"]);
        assert!(out.contains(&"TenGigabitEthernet1/1".to_string()));
        assert!(out.contains(&"10GE1/1".to_string()));
        assert_eq!(out[0], "te1/1");
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn interface_registration_and_lookup() {
        let mut b = build();
        let name = add_ifname(&mut b, "d1", &["GigabitEthernet0/1", "Gi0/1"], &["_snmp_ifIndex_1"], "x-snmp-if")
            .unwrap();
        assert_eq!(name.as_deref(), Some("GigabitEthernet0/1"));
        assert_eq!(
            ifname(&b, "d1", &["_snmp_ifIndex_1"], None).as_deref(),
            Some("GigabitEthernet0/1")
        );
        assert_eq!(
            ifname_with_guess(&b, "d1", &["gi0/1"], None).as_deref(),
            Some("GigabitEthernet0/1")
        );
        assert_eq!(ifname(&b, "d1", &["Gi0/2"], Some("test")), None);

        let again = add_ifname(&mut b, "d1", &["Gi0/1"], &["_snmp_lldpPortNum_3"], "lldp").unwrap();
        assert_eq!(again.as_deref(), Some("GigabitEthernet0/1"));
        assert!(b.to_resolve().is_empty());
    }

    #[test]
    fn bad_ips_are_not_attached() {
        let mut b = build();
        assert!(!add_device_ip(&mut b, "d1", Some("127.0.0.1"), "fping").unwrap());
        assert!(add_device_ip(&mut b, "d1", Some("10.0.0.1"), "fping").unwrap());
        assert_eq!(device_ips(&b, "d1"), vec!["10.0.0.1"]);
        assert_eq!(b.malias_dids("ip", "10.0.0.1"), vec!["d1"]);
    }

    #[test]
    fn mac_lookup_and_prefixes() {
        let mut b = build();
        add_device_mac(&mut b, "d1", Some("00:11:22:33:44:55"), Some("eth0"), "x-snmp-if").unwrap();
        add_device_prop(&mut b, "d1", &["iface", "eth0", "ip"], Some(Value::from("10.0.0.1/24")), "x").unwrap();
        assert_eq!(iface_from_mac(&b, "d1", "00:11:22:33:44:55").as_deref(), Some("eth0"));
        assert_eq!(iface_from_mac(&b, "d1", "00:11:22:33:44:56"), None);
        assert_eq!(iface_ips_prefix(&b, "d1").get("10.0.0.1"), Some(&24));
    }
}
