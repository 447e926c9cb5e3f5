//! Human interface table: one display row per device interface, with its
//! peers and configuration diagnostics.
//!
//! ```text
//! hiface.<did> = [
//!   { did, dname, hwAddr, name, description, status, speed, group, mode,
//!     pvlan, untagged, tagged, peers: [..], _meta: { <field>: {level, text} } },
//!   ...
//! ]
//! ```
//!
//! Diagnostic levels: `1` notice, `2` warning. A field has a `_meta` entry
//! only when something was reported for it.

use std::collections::HashMap;

use indexmap::IndexMap;
use nscandb_model::{
    cmp_int_split, human_number, value_as_i64, value_to_key, IfDuplex, IfStatus, Node, Ranges, SwPortMode,
    SwPortStatus,
};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::build::Build;
use crate::error::BuildError;
use crate::queries::{norm_capability, norm_capability_type, short_ifname, FdbEntry, Neighbor, Queries};

const IGNORED_IFACE: &str = r"^(unrouted VLAN [0-9]+|.+/[0-9]+--(C|Unc)ontrolled)$";

/// Below this many bits per second an up port is reported slow.
const LOW_SPEED: i64 = 100_000_000;

const META_KEYS: [&str; 7] = ["speed", "mode", "pvlan", "tagged", "untagged", "description", "status"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct Peer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub level: u8,
    pub text: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub did: String,
    pub dname: Option<String>,
    pub hw_addr: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub speed: Option<String>,
    pub group: Option<String>,
    pub mode: Option<String>,
    pub pvlan: Option<Value>,
    pub untagged: Option<String>,
    pub tagged: Option<String>,
    pub peers: Option<Vec<Peer>>,
    #[serde(rename = "_meta")]
    pub meta: IndexMap<&'static str, Meta>,
}

// ============================================================================
// Field access
// ============================================================================

/// Present and not null.
fn has(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).is_some_and(|v| !v.is_null())
}

/// Numeric field, with `0` counting as absent.
fn number(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    obj.get(key).and_then(value_as_i64).filter(|n| *n != 0)
}

fn first_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Array(items) => items.first().and_then(value_to_key),
        other => value_to_key(other),
    }
    .filter(|s| !s.is_empty())
}

fn texts(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_to_key).collect(),
        other => value_to_key(other).into_iter().collect(),
    }
}

fn ranges_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    Ranges::from_value(obj.get(key)?).map(|r| r.to_string_with(", "))
}

/// Interface view with decoded status and mode codes.
struct Iface<'a> {
    raw: &'a Map<String, Value>,
    admin: Option<IfStatus>,
    oper: Option<IfStatus>,
    duplex: Option<IfDuplex>,
    mode: Option<SwPortMode>,
    status: Option<SwPortStatus>,
}

impl<'a> Iface<'a> {
    fn new(raw: &'a Map<String, Value>) -> Self {
        let code = |key: &str| raw.get(key).and_then(value_as_i64);
        Self {
            raw,
            admin: code("adminStatus").and_then(IfStatus::from_code),
            oper: code("operStatus").and_then(IfStatus::from_code),
            duplex: code("duplex").and_then(IfDuplex::from_code),
            mode: code("swPortMode").and_then(SwPortMode::from_code),
            status: code("swPortStatus").and_then(SwPortStatus::from_code),
        }
    }

    fn admin_up(&self) -> bool {
        self.admin == Some(IfStatus::Up)
    }

    fn up(&self) -> bool {
        self.admin_up() && self.oper == Some(IfStatus::Up)
    }

    fn status_text(&self) -> Option<String> {
        match (self.admin, self.oper) {
            (Some(admin), Some(oper)) => Some(format!("{admin} / {oper}")),
            (Some(admin), None) => Some(admin.to_string()),
            _ => None,
        }
    }

    fn speed_text(&self) -> Option<String> {
        let speed = number(self.raw, "speed")?;
        let mut out = human_number(speed as f64, 0);
        if let Some(duplex) = self.duplex {
            out.push_str(&format!(" / {duplex}"));
        }
        Some(out)
    }

    fn mode_text(&self) -> Option<String> {
        let mode = self.mode?;
        match self.status {
            Some(status) if mode.is_dynamic() && self.up() => Some(format!("{mode} / {status}")),
            _ => Some(mode.to_string()),
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Default)]
struct Hint {
    has_data: bool,
    is_default: bool,
}

/// What the Cisco-specific switchport fields say about the vlans.
#[derive(Debug, Default)]
struct CiscoHints {
    access: Hint,
    trunk: Hint,
    explain: String,
}

fn cisco_hints(oif: &Iface<'_>, osp: &Map<String, Value>) -> CiscoHints {
    let mut out = CiscoHints::default();
    let vm_vlan_type = osp.get("ciscoVmVlanType").and_then(value_as_i64);

    // Without pvlan the vlans could not be normalized; a multi-vlan port
    // still lists what it carries.
    if !has(oif.raw, "pvlan") && vm_vlan_type == Some(3) {
        if let Some(vlans) = ranges_text(osp, "ciscoVmVlansDecoded") {
            out.trunk.has_data = !vlans.is_empty();
            out.explain.push_str(&format!("\n- trunk: {vlans} (native unknown)"));
        }
    } else if oif.mode != Some(SwPortMode::Fex) {
        if let Some(vlan) = number(osp, "ciscoVmVlan") {
            out.access.has_data = true;
            out.access.is_default = vlan == 1;
            out.explain.push_str(&format!("\n- access: {vlan}"));
        }

        let native = number(osp, "ciscoVlanTrunkPortNativeVlan");
        let enabled = osp
            .get("ciscoVlanTrunkPortVlansEnabledDecoded")
            .and_then(Ranges::from_value);
        if let (Some(native), Some(mut enabled)) = (native, enabled) {
            out.trunk.has_data = true;
            let tagged = enabled.remove(native).to_string_with(", ");
            let mut explain = format!("{native} (native)");
            if !tagged.is_empty() {
                explain.push_str(&format!(", {tagged}"));
            }
            out.trunk.is_default = native == 1 && (tagged == "2-4094" || tagged.is_empty());
            out.explain.push_str(&format!("\n- trunk: {explain}"));
        }
    }

    if !out.explain.is_empty() {
        out.explain = format!("Switchport configuration:{}", out.explain);
    }
    out
}

fn build_meta(oif: &Iface<'_>, osp: &Map<String, Value>) -> IndexMap<&'static str, Meta> {
    let mut messages: IndexMap<&'static str, Vec<(u8, String)>> =
        META_KEYS.iter().map(|k| (*k, Vec::new())).collect();
    let mut push = |key: &'static str, level: u8, text: String| {
        if let Some(list) = messages.get_mut(key) {
            list.push((level, text));
        }
    };

    if oif.up() {
        if oif.raw.get("speed").and_then(value_as_i64).is_some_and(|s| s < LOW_SPEED) {
            push("speed", 1, "Low speed reported".into());
        }
        match oif.duplex {
            Some(IfDuplex::Half) => push("speed", 2, "Half duplex reported".into()),
            Some(IfDuplex::Unknown) => push("speed", 1, "Unknown duplex status".into()),
            _ => {}
        }
    }

    if oif.admin_up() {
        if oif.mode.is_some_and(SwPortMode::is_dynamic) {
            let level = if oif.oper == Some(IfStatus::Up) { 2 } else { 1 };
            push("mode", level, "Switchport dynamic configuration".into());
        }
        if first_text(oif.raw, "description").is_none() {
            push("description", 1, "Port is enabled, description expected".into());
        }
    }

    let cisco = cisco_hints(oif, osp);
    let access_set = cisco.access.has_data && !cisco.access.is_default;
    let trunk_set = cisco.trunk.has_data && !cisco.trunk.is_default;
    let trunking = oif.status == Some(SwPortStatus::Trunking)
        || matches!(oif.mode, Some(SwPortMode::Trunk | SwPortMode::TrunkNoNegotiate));
    let not_trunking =
        (oif.status == Some(SwPortStatus::NotTrunking) && oif.up()) || oif.mode == Some(SwPortMode::Access);

    if !has(oif.raw, "pvlan")
        && !has(oif.raw, "untagged")
        && !has(oif.raw, "tagged")
        && (cisco.access.has_data || cisco.trunk.has_data)
    {
        // Most likely a dynamic port, or a multi-vlan port of a FEX.
        for key in ["pvlan", "untagged", "tagged"] {
            push(key, 1, cisco.explain.clone());
        }
    } else if access_set && trunk_set {
        push("mode", 1, format!("Mixed access/trunk configuration\n{}", cisco.explain));
    } else if trunking && access_set {
        push("mode", 1, format!("Access configuration on a trunking port\n{}", cisco.explain));
    } else if not_trunking && trunk_set {
        push("mode", 1, format!("Trunk configuration on a non-trunking port\n{}", cisco.explain));
    }

    messages
        .into_iter()
        .filter(|(_, list)| !list.is_empty())
        .map(|(key, list)| {
            let level = list.iter().map(|(level, _)| *level).max().unwrap_or(0);
            let text = list.into_iter().map(|(_, text)| text).collect();
            (key, Meta { level, text })
        })
        .collect()
}

// ============================================================================
// Peers
// ============================================================================

fn vendor_of(q: &Queries<'_>, mac: &str) -> Option<String> {
    q.macs_vendors(&[mac]).into_iter().next()
}

fn neighbor_peer(q: &Queries<'_>, n: &Neighbor) -> Peer {
    Peer {
        id: Some(n.id.clone()),
        label: q.device_best_name(&n.id, true),
        name: q.device_name(&n.id, false),
        ip: q.device_ip(&n.id),
        kind: n.norm_capability_type,
        vendor: q.device_mac(&n.id).and_then(|mac| vendor_of(q, &mac)),
        ifname: n.ifname.as_deref().map(short_ifname),
        ..Peer::default()
    }
}

fn fdb_peer(q: &Queries<'_>, entry: &FdbEntry) -> Peer {
    let mut peer = Peer::default();
    if let Some(id) = &entry.id {
        peer.label = q.device_best_name(id, true);
        peer.name = q.device_name(id, false);
        let mut ips = q.device_ips_from_mac(id, &entry.mac);
        if ips.is_empty() {
            ips.extend(q.device_ip(id));
        }
        if !ips.is_empty() {
            ips.sort_by(|a, b| cmp_int_split(a, b));
            peer.ip = Some(ips.join(", "));
        }
        let capability = q.device_capability(id).unwrap_or_default();
        peer.kind = norm_capability_type(&norm_capability(&capability));
        peer.id = Some(id.clone());
    }
    if peer.label.is_empty() {
        peer.label = entry.mac.clone();
    }
    peer.vendor = vendor_of(q, &entry.mac);
    peer.mac = Some(entry.mac.clone());
    if !entry.vlan.is_empty() {
        peer.vlan = Some(entry.vlan.join(", "));
    }
    peer
}

/// Switch neighbors of the interface, else the MACs learned on it.
fn peers(q: &Queries<'_>, did: &str, ifname: &str) -> Vec<Peer> {
    let neighbors = q.neighbors(did, Some(ifname), Some(&["switch"][..]));
    if !neighbors.is_empty() {
        return neighbors.iter().map(|n| neighbor_peer(q, n)).collect();
    }
    q.fdb_entries(did, ifname).iter().map(|e| fdb_peer(q, e)).collect()
}

// ============================================================================
// Stage
// ============================================================================

fn device_rows(
    q: &Queries<'_>,
    ignored: &Regex,
    did: &str,
    ifaces: &Map<String, Value>,
    sswport: Option<&Map<String, Value>>,
) -> Vec<Row> {
    let empty = Map::new();
    let dname = q.device_name(did, false);
    let mut rows: Vec<Row> = Vec::new();
    let mut row_of: HashMap<&str, usize> = HashMap::new();
    let mut channel_members: Vec<(&str, Vec<String>)> = Vec::new();

    for (kif, oif) in ifaces {
        let Some(raw) = oif.as_object() else {
            continue;
        };
        let name = first_text(raw, "name");
        if name.as_deref().is_some_and(|n| ignored.is_match(n)) {
            debug!(did = %did, ifname = %kif, "interface ignored");
            continue;
        }
        let oif = Iface::new(raw);
        let osp = sswport
            .and_then(|sp| sp.get(kif))
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let group = raw
            .get("member")
            .filter(|v| !v.is_null())
            .or_else(|| raw.get("memberOf"))
            .map(|v| texts(v).iter().map(|n| short_ifname(n)).collect::<Vec<_>>().join(", "))
            .filter(|g| !g.is_empty());

        let members = raw.get("member").map(texts).unwrap_or_default();
        let peers = if members.is_empty() {
            Some(peers(q, did, kif))
        } else {
            channel_members.push((kif.as_str(), members));
            None
        };

        row_of.insert(kif.as_str(), rows.len());
        rows.push(Row {
            did: did.to_string(),
            dname: dname.clone(),
            hw_addr: first_text(raw, "mac"),
            name,
            description: first_text(raw, "description"),
            status: oif.status_text(),
            speed: oif.speed_text(),
            group,
            mode: oif.mode_text(),
            pvlan: raw.get("pvlan").filter(|v| !v.is_null()).cloned(),
            untagged: ranges_text(raw, "untagged"),
            tagged: ranges_text(raw, "tagged"),
            peers,
            meta: build_meta(&oif, osp),
        });
    }

    // A port-channel shows the peers of its first member that has some.
    for (channel, members) in channel_members {
        let inherited = members
            .iter()
            .filter_map(|m| row_of.get(m.as_str()))
            .filter_map(|i| rows[*i].peers.as_ref())
            .find(|p| !p.is_empty())
            .cloned();
        if let (Some(peers), Some(i)) = (inherited, row_of.get(channel)) {
            rows[*i].peers = Some(peers);
        }
    }
    rows
}

pub fn run(b: &mut Build) -> Result<(), BuildError> {
    let ignored = Regex::new(IGNORED_IFACE)?;
    let sdevice = b.table("sdevice").map(Node::to_plain).unwrap_or(Value::Null);
    let sswport = b.table("sswport").map(Node::to_plain).unwrap_or(Value::Null);

    let mut out = IndexMap::new();
    {
        let q = Queries::new(b.tables(), b.vendors());
        for (did, od) in sdevice.as_object().into_iter().flatten() {
            let ifaces = od.get("iface").and_then(Value::as_object);
            let rows = match ifaces {
                Some(ifaces) => {
                    let sp = sswport.get(did).and_then(Value::as_object);
                    device_rows(&q, &ignored, did, ifaces, sp)
                }
                None => Vec::new(),
            };
            out.insert(did.clone(), Node::Value(serde_json::to_value(rows)?));
        }
    }
    debug!(devices = out.len(), "human interface table");
    b.set_table("hiface", Node::Map(out));
    Ok(())
}
