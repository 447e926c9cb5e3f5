//! The device stage: raw protocol tables → `device`, `swport`, `fdb`,
//! `rfdb`, `nei` and `rarp`.
//!
//! Tables are consumed in a fixed order since later steps resolve the
//! interface and vlan aliases registered by earlier ones:
//!
//! ```text
//! identity (fping, sys) ─> interfaces (if, aggregates, ip) ─> l3 (routes, arp)
//!   ─> l2 (bridge ports, vlans) ─> switchport normalization ─> fdb
//!   ─> local discovery (cdp/lldp) ─> neighbors (lldp, cdp)
//!   ─> conflict resolution ─> rarp interface names
//! ```

mod helpers;
mod identity;
mod iface;
pub mod ip;
mod l2;
mod l3;
mod neighbors;
mod resolve;
mod swport;

use nscandb_model::Node;
use tracing::debug;

use crate::build::Build;
use crate::error::BuildError;

pub use ip::{broadcast_ip, is_bad_device_ip, network_prefix};
pub use resolve::SHARED_MAC_DENYLIST;

/// Tables the stage always creates, even when empty.
const OUTPUT_TABLES: [&str; 6] = ["device", "swport", "fdb", "rfdb", "nei", "rarp"];

pub fn run(b: &mut Build) -> Result<(), BuildError> {
    for table in OUTPUT_TABLES {
        b.set_table(table, Node::map());
    }

    identity::fping(b)?;
    identity::sys(b)?;
    iface::interfaces(b)?;
    iface::ip_addresses(b)?;
    identity::reverse_dns(b)?;

    l3::routes(b)?;
    l3::arp(b)?;

    l2::bridge_ports(b)?;
    l2::vlans(b)?;
    swport::normalize(b)?;
    l2::fdb(b)?;

    identity::local_discovery(b)?;
    iface::lldp_local_ports(b)?;
    neighbors::lldp(b)?;
    neighbors::cdp(b)?;

    debug!("try to resolve conflicts");
    resolve::try_resolve(b)?;
    l3::resolve_rarp(b)?;
    Ok(())
}
