//! Switchport normalization.
//!
//! Vendor switchport data collected in the `swport` table is turned into the
//! same interface fields whatever the source:
//!
//! | field          | value                                  |
//! |----------------|----------------------------------------|
//! | `swPortMode`   | [`SwPortMode`] code                    |
//! | `swPortStatus` | [`SwPortStatus`] code                  |
//! | `pvlan`        | port vlan id                           |
//! | `untagged`     | `[{from, to}]` vlan ranges             |
//! | `tagged`       | `[{from, to}]` vlan ranges             |
//!
//! Every normalizer runs on every port; they only report what their own
//! source makes certain.

use nscandb_model::{value_as_i64, Data, DataList, IfStatus, Node, Range, Ranges, SwPortMode, SwPortStatus};
use serde_json::Value;
use tracing::{debug, warn};

use crate::build::Build;
use crate::error::BuildError;

type Normalized = Vec<(&'static str, Data)>;

const CISCO_ACCESS_NO_TAG: &str = "snmp-cisco-access-no-tag";

pub(super) fn normalize(b: &mut Build) -> Result<(), BuildError> {
    debug!("process switch ports");
    let mut ports = Vec::new();
    if let Some(swport) = b.table("swport").and_then(Node::as_map) {
        for (did, ifaces) in swport {
            for name in ifaces.keys() {
                ports.push((did.clone(), name.to_string()));
            }
        }
    }

    for (did, name) in ports {
        let normalizers: [fn(&Build, &str, &str) -> Normalized; 3] = [cisco, dot1q, cisco_smb];
        for normalizer in normalizers {
            for (key, data) in normalizer(b, &did, &name) {
                b.add_datalist("device", &[did.as_str(), "iface", name.as_str(), key], DataList::from_data(data))?;
            }
        }
    }
    Ok(())
}

/// First observation of a raw switchport field.
fn swport_field(b: &Build, did: &str, ifname: &str, key: &str) -> Option<Data> {
    b.get("swport", &[did, ifname, key])
        .and_then(Node::as_list)
        .and_then(DataList::first)
        .cloned()
}

fn iface_status(b: &Build, did: &str, ifname: &str, key: &str) -> Option<IfStatus> {
    b.get("device", &[did, "iface", ifname, key])
        .and_then(Node::as_list)
        .and_then(DataList::first)
        .and_then(|d| value_as_i64(&d.value))
        .and_then(IfStatus::from_code)
}

fn code(data: &Data) -> Option<i64> {
    value_as_i64(&data.value)
}

/// `[{from: v, to: v}]` for a single vlan.
fn single_vlan(data: &Data) -> Data {
    let ranges = match code(data) {
        Some(vlan) => Ranges::from_ranges(vec![Range::single(vlan)]).to_value(),
        None => Value::Array(Vec::new()),
    };
    Data::new(ranges, data.origin.clone())
}

fn mode(mode: SwPortMode, origin: &str) -> Data {
    Data::new(mode.code(), origin)
}

fn cisco(b: &Build, did: &str, ifname: &str) -> Normalized {
    let field = |key: &str| swport_field(b, did, ifname, key);
    let mut out = Normalized::new();

    let fex_index = field("fexIndex");
    let dynamic_state = field("ciscoVlanTrunkPortDynamicState");
    let vm_vlan_type = field("ciscoVmVlanType");
    let port_mode = if let Some(fex) = &fex_index {
        Some(mode(SwPortMode::Fex, &fex.origin))
    } else if let Some(state) = dynamic_state {
        Some(state)
    } else if let Some(vm_type) = &vm_vlan_type {
        // Ports of a FEX module have no vlanTrunkPort data.
        match code(vm_type) {
            Some(1) | Some(2) => Some(mode(SwPortMode::Access, &vm_type.origin)),
            Some(3) => Some(mode(SwPortMode::Trunk, &vm_type.origin)),
            _ => None,
        }
    } else {
        None
    };
    let port_mode_code = port_mode.as_ref().and_then(code).and_then(SwPortMode::from_code);
    if let Some(m) = port_mode {
        out.push(("swPortMode", m));
    }

    let mut port_status = None;
    if let Some(dynamic_status) = field("ciscoVlanTrunkPortDynamicStatus") {
        if port_mode_code != Some(SwPortMode::Fex) {
            let isl = field("ciscoVlanPortIslOperStatus");
            let trunking_by_isl = isl.as_ref().is_some_and(|isl| {
                code(&dynamic_status) == Some(SwPortStatus::NotTrunking.code())
                    && code(isl) == Some(SwPortStatus::Trunking.code())
            });
            let status = match isl {
                Some(isl) if trunking_by_isl => isl,
                _ => dynamic_status,
            };
            port_status = code(&status).and_then(SwPortStatus::from_code);
            out.push(("swPortStatus", status));
        }
    }

    // A dynamic port that is down says nothing certain about its vlans.
    let up = iface_status(b, did, ifname, "adminStatus") == Some(IfStatus::Up)
        && iface_status(b, did, ifname, "operStatus") == Some(IfStatus::Up);
    let native = field("ciscoVlanTrunkPortNativeVlan");
    let enabled = field("ciscoVlanTrunkPortVlansEnabledDecoded");
    let vm_vlan = field("ciscoVmVlan");

    match (native, enabled) {
        (Some(native), Some(enabled))
            if matches!(port_mode_code, Some(SwPortMode::Trunk | SwPortMode::TrunkNoNegotiate))
                || (up && port_status == Some(SwPortStatus::Trunking)) =>
        {
            let mut tagged = Ranges::from_value(&enabled.value).unwrap_or_default();
            if let Some(vlan) = code(&native) {
                tagged.remove(vlan);
            }
            out.push(("untagged", single_vlan(&native)));
            out.push(("tagged", Data::new(tagged.to_value(), enabled.origin.clone())));
            out.push(("pvlan", native));
        }
        _ => {
            if let Some(vlan) = vm_vlan.filter(|_| {
                port_mode_code == Some(SwPortMode::Access)
                    || (up && port_status == Some(SwPortStatus::NotTrunking))
            }) {
                out.push(("untagged", single_vlan(&vlan)));
                out.push(("tagged", Data::new(Value::Array(Vec::new()), CISCO_ACCESS_NO_TAG)));
                out.push(("pvlan", vlan));
            }
        }
    }
    out
}

/// Sorted, deduplicated vlan ids of a vlan list value.
fn vlan_ids(value: &Value) -> Vec<i64> {
    let mut ids: Vec<i64> = value
        .as_array()
        .map(|items| items.iter().filter_map(value_as_i64).collect())
        .unwrap_or_default();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn dot1q(b: &Build, did: &str, ifname: &str) -> Normalized {
    let field = |key: &str| swport_field(b, did, ifname, key);
    let mut out = Normalized::new();

    let pvid = field("dot1qPvid");
    if let Some(pvid) = &pvid {
        out.push(("pvlan", pvid.clone()));
    }

    // Untagged may be empty, egress may not.
    let Some(egress) = field("dot1qEgressVlans") else {
        return out;
    };
    let untagged_ids = field("dot1qUntaggedVlans")
        .map(|d| vlan_ids(&d.value))
        .unwrap_or_default();
    let (untagged, tagged): (Vec<i64>, Vec<i64>) = vlan_ids(&egress.value)
        .into_iter()
        .partition(|id| untagged_ids.contains(id));

    let origin = egress.origin.as_str();
    let to_ranges = |ids: &[i64]| match Ranges::from_values(ids.iter().copied()) {
        Ok(r) => r.to_value(),
        Err(err) => {
            warn!(did = %did, ifname = %ifname, error = %err, "invalid vlan list");
            Value::Array(Vec::new())
        }
    };
    out.push(("untagged", Data::new(to_ranges(&untagged), origin)));
    out.push(("tagged", Data::new(to_ranges(&tagged), origin)));

    let port_mode = if untagged.len() > 1 {
        Some(SwPortMode::Dot1qLikeGeneral)
    } else if !tagged.is_empty() {
        Some(SwPortMode::Dot1qLikeTrunk)
    } else if let Some(pvid) = &pvid {
        // HP trunk-like ports report no pvid at all.
        if untagged.len() == 1 && code(pvid) == Some(untagged[0]) {
            Some(SwPortMode::Dot1qLikeAccess)
        } else {
            Some(SwPortMode::Dot1qLikeGeneral)
        }
    } else {
        None
    };
    if let Some(m) = port_mode {
        out.push(("swPortMode", mode(m, origin)));
    }
    out
}

fn cisco_smb(b: &Build, did: &str, ifname: &str) -> Normalized {
    let field = |key: &str| swport_field(b, did, ifname, key);
    let mut out = Normalized::new();

    let Some(state) = field("ciscoSmbVlanPortModeState") else {
        return out;
    };
    let origin = state.origin.as_str();
    // The second code of each pair is the same mode with a forbidden default vlan.
    let (port_mode, vlan_key) = match code(&state) {
        Some(1 | 10) => (SwPortMode::General, None),
        Some(3 | 12) => (SwPortMode::Trunk, Some("ciscoSmbVlanTrunkPortModeNativeVlanId")),
        Some(2 | 11) => (SwPortMode::Access, Some("ciscoSmbVlanAccessPortModeVlanId")),
        Some(7 | 15) => (SwPortMode::Customer, Some("ciscoSmbVlanCustomerPortModeVlanId")),
        _ => return out,
    };
    out.push(("swPortMode", mode(port_mode, origin)));

    if let Some(vlan) = vlan_key.and_then(field) {
        out.push(("untagged", single_vlan(&vlan)));
        // Trunk tagged vlans come from the dot1q tables.
        if port_mode != SwPortMode::Trunk {
            out.push(("tagged", Data::new(Value::Array(Vec::new()), origin)));
        }
        out.push(("pvlan", vlan));
    }
    out
}
