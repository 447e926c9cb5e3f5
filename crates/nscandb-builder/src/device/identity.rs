//! Device identity: reachability, system group, reverse DNS and the local
//! CDP/LLDP identity a device advertises.

use serde_json::Value;
use tracing::debug;

use super::helpers::{add_device_ip, add_device_mac, add_device_name, add_device_prop};
use crate::build::{field, int, text, Build, DeviceKey};
use crate::error::BuildError;
use crate::lookup::decode_oid_name;

const ENTERPRISES_OID: &str = ".1.3.6.1.4.1";

pub(super) fn fping(b: &mut Build) -> Result<(), BuildError> {
    debug!("process cb-ipv4-fping entries");
    b.for_each2("cb-ipv4-fping", DeviceKey::Second, |b, did, _, k2, _| {
        add_device_ip(b, did, Some(k2), "cb-ipv4-fping")?;
        Ok(())
    })
}

pub(super) fn sys(b: &mut Build) -> Result<(), BuildError> {
    const T: &str = "x-snmp-sys";
    debug!("process x-snmp-sys entries");
    b.for_each1(T, |b, did, _, v| {
        add_device_name(b, did, text(v, "sysName").as_deref(), T)?;
        add_device_prop(b, did, &["description"], field(v, "sysDescr").cloned(), T)?;
        add_device_prop(b, did, &["location"], field(v, "sysLocation").cloned(), T)?;
        add_device_prop(b, did, &["contact"], field(v, "sysContact").cloned(), T)?;
        if let Some(oid) = text(v, "sysObjectID") {
            let name = decode_oid_name(b.oids(), &oid, Some(ENTERPRISES_OID), 6);
            add_device_prop(b, did, &["type"], Some(Value::from(name)), T)?;
        }
        Ok(())
    })
}

/// PTR names, unless the name merely restates the address
/// (`10.0.0.1.example.net`, `10-0-0-1.example.net`).
pub(super) fn reverse_dns(b: &mut Build) -> Result<(), BuildError> {
    const T: &str = "cb-resolve";
    debug!("process cb-resolve entries");
    b.for_each1(T, |b, did, k1, v| {
        let Some(ptr) = text(v, "ptr") else {
            return Ok(());
        };
        if !ptr.starts_with(k1) && !ptr.starts_with(&k1.replace('.', "-")) {
            add_device_name(b, did, Some(&ptr), T)?;
        }
        Ok(())
    })
}

pub(super) fn local_discovery(b: &mut Build) -> Result<(), BuildError> {
    debug!("process x-snmp-cdpGlobal entries");
    b.for_each1("x-snmp-cdpGlobal", |b, did, _, v| {
        let t = "x-snmp-cdpGlobal";
        let id = text(v, "cdpGlobalDeviceIdDecoded");
        match int(v, "cdpGlobalDeviceIdFormat") {
            // other(3), or no format at all: the device name
            None | Some(3) => {
                add_device_name(b, did, id.as_deref(), t)?;
            }
            Some(2) => {
                add_device_mac(b, did, id.as_deref(), None, t)?;
            }
            Some(_) => {}
        }
        Ok(())
    })?;

    debug!("process x-snmp-lldpLocSys entries");
    b.for_each1("x-snmp-lldpLocSys", |b, did, _, v| {
        let t = "x-snmp-lldpLocSys";
        let chassis = text(v, "chassisIdDecoded");
        match int(v, "chassisIdSubtype") {
            Some(4) => {
                add_device_mac(b, did, chassis.as_deref(), None, t)?;
            }
            Some(5) => {
                add_device_ip(b, did, chassis.as_deref(), t)?;
            }
            _ => {}
        }
        add_device_name(b, did, text(v, "sysName").as_deref(), t)?;
        add_device_prop(b, did, &["description"], field(v, "sysDesc").cloned(), t)?;
        add_capabilities(b, did, v.get("sysCapEnabledNames"), t)
    })?;

    debug!("process x-snmp-lldpLocMan entries");
    b.for_each1("x-snmp-lldpLocMan", |b, did, _, v| {
        add_device_ip(b, did, text(v, "manAddr").as_deref(), "x-snmp-lldpLocMan")?;
        Ok(())
    })
}

pub(super) fn add_capabilities(
    b: &mut Build,
    did: &str,
    names: Option<&Value>,
    origin: &str,
) -> Result<(), BuildError> {
    let Some(Value::Array(names)) = names else {
        return Ok(());
    };
    for name in names {
        add_device_prop(b, did, &["capability"], Some(name.clone()), origin)?;
    }
    Ok(())
}
