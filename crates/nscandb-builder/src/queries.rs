//! Read helpers over built tables, shared by the `hiface` stage and the
//! serving layer.
//!
//! Short tables (`sdevice`, `sfdb`, `snei`) hold plain values; the full
//! `device` table still holds datalists.

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use nscandb_model::{cmp_int_split, value_to_key, Node};
use serde::Serialize;
use serde_json::Value;

use crate::build::Tables;
use crate::lookup::VendorLookup;

/// Normalized capabilities of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormCapability {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub telephone: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wlan_access_point: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub switch: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub router: bool,
}

impl NormCapability {
    pub fn keys(&self) -> Vec<&'static str> {
        [
            (self.telephone, "telephone"),
            (self.wlan_access_point, "wlanAccessPoint"),
            (self.switch, "switch"),
            (self.router, "router"),
        ]
        .into_iter()
        .filter_map(|(set, key)| set.then_some(key))
        .collect()
    }
}

/// Phones and access points hide any other capability they report.
pub fn norm_capability<S: AsRef<str>>(capability: &[S]) -> NormCapability {
    let has = |name: &str| capability.iter().any(|c| c.as_ref() == name);
    let mut out = NormCapability::default();
    if has("telephone") || has("voip-phone") {
        out.telephone = true;
    } else if has("wlanAccessPoint") || has("tb-bridge") {
        out.wlan_access_point = true;
    } else {
        out.switch = has("bridge") || has("switch");
        out.router = has("router");
    }
    out
}

pub fn norm_capability_type(norm: &NormCapability) -> Option<&'static str> {
    if norm.telephone {
        Some("telephone")
    } else if norm.wlan_access_point {
        Some("wlanAccessPoint")
    } else if norm.switch {
        Some(if norm.router { "l2/l3 switch" } else { "l2 switch" })
    } else if norm.router {
        Some("router")
    } else {
        None
    }
}

/// `GigabitEthernet0/1` → `Gi0/1`. Unknown prefixes are kept.
pub fn short_ifname(name: &str) -> String {
    let split = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '/' || *c == '.')
        .last()
        .map(|(i, _)| i);
    let Some(split) = split else {
        return name.to_string();
    };
    let (left, right) = name.split_at(split);
    let short = match left.to_lowercase().as_str() {
        "fastethernet" => "Fa",
        "gigabitethernet" => "Gi",
        "tengigabitethernet" => "Te",
        "port-channel" => "Po",
        "ethernet" => "Eth",
        _ => return name.to_string(),
    };
    format!("{short}{right}")
}

/// Host part of a dotted name. A leading dot is kept so the name never
/// becomes empty.
pub fn strip_domain(name: &str) -> &str {
    match name.find('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Distinct MACs among `sfdb.<did>.<ifname>` entries.
pub fn count_sfdb_macs(entries: &[Value]) -> usize {
    entries
        .iter()
        .filter_map(|e| e.get("mac").and_then(Value::as_str))
        .collect::<BTreeSet<_>>()
        .len()
}

/// One neighbor of a device with the capabilities of the remote device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    /// Local interface the neighbor was seen on.
    #[serde(skip)]
    pub local_ifname: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<Vec<String>>,
    pub norm_capability: NormCapability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub norm_capability_type: Option<&'static str>,
    /// The `snei` entry as stored.
    #[serde(skip)]
    pub entry: Value,
}

/// MACs learned on an interface, one entry per MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FdbEntry {
    pub mac: String,
    /// Device the MAC belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vlan: Vec<String>,
}

/// Query view over built tables.
#[derive(Clone, Copy)]
pub struct Queries<'a> {
    tables: &'a Tables,
    vendors: &'a dyn VendorLookup,
}

impl<'a> Queries<'a> {
    pub fn new(tables: &'a Tables, vendors: &'a dyn VendorLookup) -> Self {
        Self { tables, vendors }
    }

    fn node(&self, table: &str, path: &[&str]) -> Option<&'a Node> {
        self.tables.get(table)?.get_path(path)
    }

    /// Plain array at `table.path`; a scalar counts as a one-item array.
    fn items(&self, table: &str, path: &[&str]) -> Vec<Value> {
        match self.node(table, path).map(Node::to_plain) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        }
    }

    fn sdevice_first(&self, did: &str, key: &str) -> Option<String> {
        self.items("sdevice", &[did, key]).first().and_then(value_to_key)
    }

    pub fn device_ip(&self, did: &str) -> Option<String> {
        self.sdevice_first(did, "ip")
    }

    pub fn device_ips(&self, did: &str) -> Vec<String> {
        self.items("sdevice", &[did, "ip"]).iter().filter_map(value_to_key).collect()
    }

    pub fn device_mac(&self, did: &str) -> Option<String> {
        self.sdevice_first(did, "mac")
    }

    pub fn device_name(&self, did: &str, strip: bool) -> Option<String> {
        let name = self.sdevice_first(did, "name")?;
        Some(if strip { strip_domain(&name).to_string() } else { name })
    }

    /// Name, else address, else MAC, else the id itself.
    pub fn device_best_name(&self, did: &str, strip: bool) -> String {
        self.device_name(did, strip)
            .or_else(|| self.device_ip(did))
            .or_else(|| self.device_mac(did))
            .unwrap_or_else(|| did.to_string())
    }

    /// Bare addresses of the interfaces whose MAC is `mac`.
    pub fn device_ips_from_mac(&self, did: &str, mac: &str) -> Vec<String> {
        let mac = Value::from(mac);
        let mut out = IndexSet::new();
        let Some(ifaces) = self.node("device", &[did, "iface"]).and_then(Node::as_map) else {
            return Vec::new();
        };
        for iface in ifaces.values() {
            let has_mac = iface
                .get("mac")
                .and_then(Node::as_list)
                .is_some_and(|l| l.contains_value(&mac));
            if !has_mac {
                continue;
            }
            for ip in iface.get("ip").and_then(Node::as_list).into_iter().flat_map(|l| l.str_values()) {
                let bare = ip.split_once('/').map_or(ip, |(addr, _)| addr);
                out.insert(bare.to_string());
            }
        }
        out.into_iter().collect()
    }

    pub fn device_macs(&self, did: &str) -> Vec<&'a str> {
        self.node("device", &[did, "mac"])
            .and_then(Node::as_list)
            .map(|l| l.str_values())
            .unwrap_or_default()
    }

    /// MACs of the interfaces accepted by `filter`, deduplicated.
    pub fn device_macs_from_iface<F>(&self, did: &str, filter: F) -> Option<Vec<&'a str>>
    where
        F: Fn(&str, &Node) -> bool,
    {
        let ifaces = self.node("device", &[did, "iface"])?.as_map()?;
        let mut out = IndexSet::new();
        for (ifname, iface) in ifaces {
            let Some(macs) = iface.get("mac").and_then(Node::as_list) else {
                continue;
            };
            if !filter(ifname, iface) {
                continue;
            }
            out.extend(macs.str_values());
        }
        Some(out.into_iter().collect())
    }

    /// Vendors of the given MACs, by their first three octets.
    pub fn macs_vendors<S: AsRef<str>>(&self, macs: &[S]) -> Vec<String> {
        let mut out = IndexSet::new();
        for mac in macs {
            let prefix = mac.as_ref().get(..8).unwrap_or(mac.as_ref());
            if let Some(vendor) = self.vendors.vendor(prefix) {
                out.insert(vendor.to_string());
            }
        }
        out.into_iter().collect()
    }

    pub fn device_capability(&self, did: &str) -> Option<Vec<String>> {
        self.node("sdevice", &[did, "capability"])?;
        Some(
            self.items("sdevice", &[did, "capability"])
                .iter()
                .filter_map(value_to_key)
                .collect(),
        )
    }

    /// Neighbors of a device, or of one of its interfaces.
    ///
    /// With a `filter`, neighbors whose normalized capabilities share no key
    /// with it are skipped.
    pub fn neighbors(&self, did: &str, ifname: Option<&str>, filter: Option<&[&str]>) -> Vec<Neighbor> {
        let Some(ifaces) = self.node("snei", &[did]).and_then(Node::as_map) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for local in ifaces.keys() {
            if ifname.is_some_and(|name| name != local.as_str()) {
                continue;
            }
            for entry in self.items("snei", &[did, local.as_str()]) {
                let Some(id) = entry.get("id").and_then(value_to_key) else {
                    continue;
                };
                let capability = self.device_capability(&id);
                let norm = norm_capability(capability.as_deref().unwrap_or_default());
                if let Some(filter) = filter {
                    if norm.keys().iter().all(|k| !filter.contains(k)) {
                        continue;
                    }
                }
                out.push(Neighbor {
                    local_ifname: local.clone(),
                    ifname: entry.get("ifname").and_then(value_to_key),
                    id,
                    capability,
                    norm_capability: norm,
                    norm_capability_type: norm_capability_type(&norm),
                    entry,
                });
            }
        }
        out
    }

    /// Forwarding entries of an interface grouped by MAC, with the MAC's
    /// device and its vlans in numeric order.
    pub fn fdb_entries(&self, did: &str, ifname: &str) -> Vec<FdbEntry> {
        let entries = self.items("sfdb", &[did, ifname]);
        let mut by_mac: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for entry in &entries {
            let Some(mac) = entry.get("mac").and_then(value_to_key) else {
                continue;
            };
            let vlans = by_mac.entry(mac).or_default();
            if let Some(vlan) = entry.get("vlan").and_then(value_to_key) {
                vlans.insert(vlan);
            }
        }

        by_mac
            .into_iter()
            .map(|(mac, vlans)| {
                let mut vlan: Vec<String> = vlans.into_iter().collect();
                vlan.sort_by(|a, b| cmp_int_split(a, b));
                FdbEntry {
                    id: self
                        .node("ualias", &["device", "mac", mac.as_str()])
                        .and_then(Node::as_value)
                        .and_then(value_to_key),
                    mac,
                    vlan,
                }
            })
            .collect()
    }
}
