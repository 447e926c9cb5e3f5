//! nscandb value model
//!
//! Everything the builder pipeline stores is a [`Node`] tree. Leaves carry
//! provenance:
//!
//! ```text
//! device ─┬─ <did> ─┬─ id        Data { value: "<did>", origin: "x-snmp-sys" }
//!         │         ├─ ip        DataList { "fping|10.0.0.1": Data, "x-snmp-ipAdEnt|10.0.0.1": Data }
//!         │         └─ iface ─── <ifname> ─── mac   DataList { ... }
//!         └─ ...
//! ```
//!
//! - [`Data`]: one observation, `(value, origin)`; equality ignores the origin.
//! - [`DataList`]: observations keyed by `origin|derived-key`, merged by key union.
//! - [`Projection`] / [`SimplifySpec`]: declarative filter → sort → uniq →
//!   format → finish pipeline used to build the short serving tables.
//! - [`Ranges`]: compact integer ranges used for VLAN sets.

pub mod cmp;
pub mod consts;
pub mod data;
pub mod node;
pub mod projection;
pub mod ranges;

pub use cmp::{cmp_int_split, cmp_values, human_number};
pub use consts::{IfDuplex, IfStatus, SwPortMode, SwPortStatus};
pub use data::{auto_key, Data, DataList};
pub use node::{value_as_i64, value_to_key, Node};
pub use projection::{simplify, Format, Override, Projection, SimplifySpec, Uniq};
pub use ranges::{Range, RangeError, Ranges};
