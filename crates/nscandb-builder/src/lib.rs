//! nscandb builder pipeline
//!
//! Turns the parsed tables of one network scan (`ndb`) into a queryable
//! device and topology database:
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────── Registry ─────────────────────────────┐   ┌──────────┐
//! │   ndb    │──►│ 100 ndb-drops → 200 device → 600..640 short tables → 810 hiface   │──►│ Database │
//! │ (tables) │   │                 shared Build: tables, aliases, id generator        │   │          │
//! └──────────┘   └────────────────────────────────────────────────────────────────────┘   └──────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Provenance**: every stored fact is a [`Data`](nscandb_model::Data)
//!   tagged with the table it came from.
//! - **Identity resolution**: devices seen through several protocols are
//!   merged when their identities agree; the rest is kept in `toResolve`.
//! - **Serving tables**: `s*` tables collapse provenance with per-field
//!   policies, `hiface` renders one row per interface.

pub mod build;
pub mod device;
mod drops;
mod error;
pub mod hiface;
mod lookup;
pub mod queries;
mod registry;
pub mod short;

pub use build::{
    Build, BuildOptions, Conflict, DeviceKey, IdGenerator, Ndb, OnConflict, RandomIds, Tables, Unresolved,
};
pub use error::BuildError;
pub use lookup::{decode_oid_name, OidLookup, VendorLookup};
pub use nscandb_model::Node;
pub use queries::Queries;
pub use registry::{Database, Registry, StageDef, StageFn};
