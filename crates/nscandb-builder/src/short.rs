//! Short tables: every datalist of a full table collapsed to plain values
//! for serving.
//!
//! | stage     | from     | to        |
//! |-----------|----------|-----------|
//! | `sdevice` | `device` | `sdevice` |
//! | `sfdb`    | `fdb`    | `sfdb`    |
//! | `srfdb`   | `rfdb`   | `srfdb`   |
//! | `sswport` | `swport` | `sswport` |
//! | `snei`    | `nei`    | `snei`    |

use indexmap::IndexMap;
use nscandb_model::projection::{by_ip, by_origin_priority, by_value, chain};
use nscandb_model::{simplify, value_to_key, Data, Node, Projection, SimplifySpec};
use serde_json::{json, Value};
use tracing::debug;

use crate::build::Build;
use crate::error::BuildError;

const VLAN_PRIORITY: [&str; 5] = [
    "x-snmp-vm",
    "x-snmp-vlanTrunkPort",
    "x-snmp-cisco-smb-vlan",
    "x-snmp-dot1q",
    "snmp",
];

fn simplify_table(b: &mut Build, from: &str, to: &str, spec: &SimplifySpec) -> Result<(), BuildError> {
    let out = b
        .table(from)
        .and_then(|node| simplify(node, spec))
        .unwrap_or_else(Node::map);
    debug!(from, to, entries = out.keys().len(), "short table");
    b.set_table(to, out);
    Ok(())
}

fn by_priority(patterns: &[&str]) -> Projection {
    Projection::new().sort(by_origin_priority(patterns))
}

/// Field policies of the short device table.
pub fn sdevice_spec() -> SimplifySpec {
    let iface = SimplifySpec::new()
        .any(SimplifySpec::leaf(by_priority(&["snmp"]).first()))
        .field("ip", SimplifySpec::leaf(Projection::new().cancel_finish()))
        .field("name", SimplifySpec::leaf(Projection::new().cancel_sort().cancel_finish()))
        .field("member", SimplifySpec::leaf(by_priority(&["x-snmp-hwTrunk", "snmp"])))
        .field("memberOf", SimplifySpec::leaf(by_priority(&["x-snmp-hwTrunk", "snmp"])))
        .field("pvlan", SimplifySpec::leaf(by_priority(&VLAN_PRIORITY)))
        .field("tagged", SimplifySpec::leaf(by_priority(&VLAN_PRIORITY)))
        .field("untagged", SimplifySpec::leaf(by_priority(&VLAN_PRIORITY)))
        .field(
            "swPortMode",
            SimplifySpec::leaf(by_priority(&["x-snmp-vlanTrunkPort", "x-snmp-cisco-smb-vlan", "x-snmp-dot1q", "snmp"])),
        )
        .field(
            "trunkStatus",
            SimplifySpec::leaf(by_priority(&[
                "x-snmp-vlanTrunkPort",
                "x-snmp-stackPort",
                "x-snmp-cisco-smb-vlan",
                "x-snmp-dot1q",
                "snmp",
            ])),
        );

    let ip = Projection::new()
        .filter(|d| !d.as_str().is_some_and(|ip| ip.starts_with("127.")))
        .sort(chain(vec![by_origin_priority(&["cdp", "lldp", "arpcount", "fping"]), by_ip()]));

    // Routes of x-snmp-ipRoute may carry other metrics, prefer the CIDR table.
    let route = Projection::new().cancel_uniq().raw().finish(|nodes| {
        let data: Vec<&Data> = nodes.iter().filter_map(Node::as_data).collect();
        let cidr = data.iter().any(|d| d.origin == "x-snmp-inetCidrRoute");
        let values = data
            .into_iter()
            .filter(|d| !cidr || d.origin == "x-snmp-inetCidrRoute")
            .map(|d| d.value.clone())
            .collect();
        Some(Node::Value(Value::Array(values)))
    });

    let device = SimplifySpec::new()
        .any(SimplifySpec::leaf(
            Projection::new()
                .sort(chain(vec![by_origin_priority(&["snmp"]), by_value()]))
                .uniq(),
        ))
        .field(
            "capability",
            SimplifySpec::leaf(Projection::new().sort(chain(vec![by_origin_priority(&["lldp", "cdp"]), by_value()]))),
        )
        .field("iface", SimplifySpec::new().any(iface))
        .field("ip", SimplifySpec::leaf(ip))
        .field("name", SimplifySpec::leaf(by_priority(&["sys"])))
        .field("route", SimplifySpec::leaf(route))
        .field(
            "vlan",
            SimplifySpec::new().any(SimplifySpec::new().any(SimplifySpec::leaf(Projection::new().first()))),
        );

    SimplifySpec::new().any(device)
}

pub fn sdevice(b: &mut Build) -> Result<(), BuildError> {
    simplify_table(b, "device", "sdevice", &sdevice_spec())
}

pub fn sfdb(b: &mut Build) -> Result<(), BuildError> {
    let entries = SimplifySpec::leaf(by_priority(&["snmp"]).uniq());
    let spec = SimplifySpec::new().any(SimplifySpec::new().any(entries));
    simplify_table(b, "fdb", "sfdb", &spec)
}

pub fn srfdb(b: &mut Build) -> Result<(), BuildError> {
    let spec = SimplifySpec::new().any(SimplifySpec::leaf(by_priority(&["snmp"]).uniq()));
    simplify_table(b, "rfdb", "srfdb", &spec)
}

pub fn sswport(b: &mut Build) -> Result<(), BuildError> {
    let field = SimplifySpec::leaf(by_priority(&["snmp"]).first());
    let spec = SimplifySpec::new().any(SimplifySpec::new().any(SimplifySpec::new().any(field)));
    simplify_table(b, "swport", "sswport", &spec)
}

// ============================================================================
// Neighbors
// ============================================================================

/// One protocol's neighbors of an interface. LLDP wins over the others when
/// both report something; within the kept entries the `snmp` origins come
/// first.
fn pick_neighbors(nodes: Vec<Node>) -> Option<Node> {
    let data: Vec<Data> = nodes
        .into_iter()
        .filter_map(|n| match n {
            Node::Data(d) => Some(d),
            _ => None,
        })
        .collect();
    let is_lldp = |d: &Data| d.origin.to_lowercase().contains("lldp");
    let data: Vec<Data> = if data.iter().any(is_lldp) && !data.iter().all(is_lldp) {
        data.into_iter().filter(is_lldp).collect()
    } else {
        data
    };

    let mut by_origin: IndexMap<String, Vec<Value>> = IndexMap::new();
    for d in data {
        by_origin.entry(d.origin).or_default().push(d.value);
    }
    let mut groups: Vec<Data> = by_origin
        .into_iter()
        .map(|(origin, values)| Data::new(values, origin))
        .collect();
    let snmp_first = by_origin_priority(&["snmp"]);
    groups.sort_by(|a, b| snmp_first(a, b));
    groups.into_iter().next().map(|d| Node::Value(d.value))
}

fn neighbors_at<'a>(snei: &'a IndexMap<String, Node>, did: &str, ifname: &str) -> Option<&'a Vec<Value>> {
    snei.get(did)?.get(ifname)?.as_value()?.as_array()
}

/// Make every edge bidirectional: an edge reported only by one side gets its
/// reverse, marked `inversed`.
fn add_inverse_neighbors(snei: &mut IndexMap<String, Node>) {
    let mut edges = Vec::new();
    for (did, ifaces) in snei.iter() {
        for (ifname, neighbors) in ifaces.as_map().into_iter().flatten() {
            for n in neighbors.as_value().and_then(Value::as_array).into_iter().flatten() {
                if let (Some(id), Some(nei_ifname)) =
                    (n.get("id").and_then(value_to_key), n.get("ifname").and_then(value_to_key))
                {
                    edges.push((did.clone(), ifname.clone(), id, nei_ifname));
                }
            }
        }
    }

    for (did, ifname, id, nei_ifname) in edges {
        let known = neighbors_at(snei, &id, &nei_ifname).is_some_and(|reverse| {
            reverse.iter().any(|e| {
                e.get("id").and_then(value_to_key).as_deref() == Some(did.as_str())
                    && e.get("ifname").and_then(value_to_key).as_deref() == Some(ifname.as_str())
            })
        });
        if known {
            continue;
        }
        let Some(ifaces) = snei.entry(id).or_insert_with(Node::map).as_map_mut() else {
            continue;
        };
        let slot = ifaces
            .entry(nei_ifname)
            .or_insert_with(|| Node::Value(Value::Array(Vec::new())));
        if let Node::Value(Value::Array(reverse)) = slot {
            reverse.push(json!({ "id": did, "ifname": ifname, "inversed": true }));
        }
    }
}

pub fn snei(b: &mut Build) -> Result<(), BuildError> {
    let leaf = Projection::new().raw().finish(pick_neighbors);
    let spec = SimplifySpec::new().any(SimplifySpec::new().any(SimplifySpec::leaf(leaf)));
    simplify_table(b, "nei", "snei", &spec)?;
    if let Some(Node::Map(mut snei)) = b.table("snei").cloned() {
        add_inverse_neighbors(&mut snei);
        b.set_table("snei", Node::Map(snei));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, Ndb};
    use nscandb_model::DataList;
    use std::sync::Arc;

    fn build() -> Build {
        Build::new(Arc::new(Ndb::new()), BuildOptions::default())
    }

    fn add(b: &mut Build, table: &str, path: &[&str], value: Value, origin: &str) {
        b.add_datalist(table, path, DataList::single(value, origin)).unwrap();
    }

    #[test]
    fn device_fields_follow_their_policies() {
        let mut b = build();
        add(&mut b, "device", &["d1", "ip"], json!("10.0.0.10"), "fping");
        add(&mut b, "device", &["d1", "ip"], json!("127.0.0.1"), "x-snmp-ipAdEnt");
        add(&mut b, "device", &["d1", "ip"], json!("10.0.0.9"), "x-snmp-cdpCache-external");
        add(&mut b, "device", &["d1", "name"], json!("sw1.lan"), "cb-resolve");
        add(&mut b, "device", &["d1", "name"], json!("sw1"), "x-snmp-sys");
        add(&mut b, "device", &["d1", "iface", "Gi0/1", "speed"], json!(100), "x-snmp-if");
        add(&mut b, "device", &["d1", "iface", "Gi0/1", "ip"], json!("10.0.0.1/24"), "x-snmp-ipAdEnt");
        add(&mut b, "device", &["d1", "iface", "Gi0/1", "name"], json!("GigabitEthernet0/1"), "x-snmp-if");
        add(&mut b, "device", &["d1", "vlan", "10", "name"], json!("users"), "x-snmp-dot1qVlan");
        add(&mut b, "device", &["d1", "route"], json!({"dest": "0.0.0.0/0"}), "x-snmp-ipRoute");
        add(&mut b, "device", &["d1", "route"], json!({"dest": "10.1.0.0/16"}), "x-snmp-inetCidrRoute");
        sdevice(&mut b).unwrap();

        let d = b.table("sdevice").and_then(|t| t.get("d1")).unwrap().to_plain();
        assert_eq!(d["ip"], json!(["10.0.0.9", "10.0.0.10"]));
        assert_eq!(d["name"], json!(["sw1", "sw1.lan"]));
        assert_eq!(d["iface"]["Gi0/1"]["speed"], json!(100));
        assert_eq!(d["iface"]["Gi0/1"]["ip"], json!(["10.0.0.1/24"]));
        assert_eq!(d["iface"]["Gi0/1"]["name"], json!(["GigabitEthernet0/1"]));
        assert_eq!(d["vlan"]["10"]["name"], json!("users"));
        assert_eq!(d["route"], json!([{"dest": "10.1.0.0/16"}]));
    }

    #[test]
    fn fdb_tables_are_deduplicated() {
        let mut b = build();
        add(&mut b, "fdb", &["d1", "Gi0/1"], json!({"mac": "aa"}), "x-snmp-dot1dTpFdb");
        add(&mut b, "fdb", &["d1", "Gi0/1"], json!({"mac": "aa"}), "cb-snmp-cisco-fdb");
        add(&mut b, "rfdb", &["aa"], json!({"did": "d1", "ifname": "Gi0/1"}), "x-snmp-dot1dTpFdb");
        sfdb(&mut b).unwrap();
        srfdb(&mut b).unwrap();
        let sfdb = b.table("sfdb").unwrap().to_plain();
        assert_eq!(sfdb["d1"]["Gi0/1"], json!([{"mac": "aa"}]));
        let srfdb = b.table("srfdb").unwrap().to_plain();
        assert_eq!(srfdb["aa"], json!([{"did": "d1", "ifname": "Gi0/1"}]));
    }

    #[test]
    fn missing_tables_give_empty_short_tables() {
        let mut b = build();
        sswport(&mut b).unwrap();
        assert_eq!(b.table("sswport"), Some(&Node::map()));
    }

    #[test]
    fn lldp_neighbors_win_and_edges_are_inversed() {
        let mut b = build();
        add(&mut b, "nei", &["d1", "Gi0/1"], json!({"id": "d2", "ifname": "Gi0/24"}), "x-snmp-lldpRem");
        add(&mut b, "nei", &["d1", "Gi0/1"], json!({"id": "d3", "ifname": "eth0"}), "x-snmp-cdpCache");
        add(&mut b, "nei", &["d2", "Gi0/24"], json!({"id": "d1", "ifname": "Gi0/1"}), "x-snmp-cdpCache");
        snei(&mut b).unwrap();
        let snei = b.table("snei").unwrap().to_plain();
        assert_eq!(snei["d1"]["Gi0/1"], json!([{"id": "d2", "ifname": "Gi0/24"}]));
        assert_eq!(snei["d2"]["Gi0/24"], json!([{"id": "d1", "ifname": "Gi0/1"}]));
        assert!(snei.get("d3").is_none());

        let mut b = build();
        add(&mut b, "nei", &["d1", "Gi0/1"], json!({"id": "d3", "ifname": "eth0"}), "x-snmp-cdpCache");
        super::snei(&mut b).unwrap();
        let snei = b.table("snei").unwrap().to_plain();
        assert_eq!(
            snei["d3"]["eth0"],
            json!([{"id": "d1", "ifname": "Gi0/1", "inversed": true}])
        );
    }
}
