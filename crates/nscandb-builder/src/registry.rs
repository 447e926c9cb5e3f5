//! Ordered builder stages and the pipeline runner.
//!
//! ```text
//!   ndb ──> [100 ndb-drops] ──> [200 device] ──> [600 sdevice] ──> ... ──> [810 hiface] ──> Database
//! ```
//!
//! Stages run strictly in position order over one shared [`Build`]. The
//! first failing stage aborts the run and nothing is returned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, info_span};

use crate::build::{Build, BuildOptions, Ndb, Tables, Unresolved};
use crate::error::BuildError;
use crate::lookup::VendorLookup;
use crate::queries::Queries;
use crate::{device, drops, hiface, short};

pub type StageFn = Arc<dyn Fn(&mut Build) -> Result<(), BuildError> + Send + Sync>;

#[derive(Clone)]
pub struct StageDef {
    pub position: u32,
    pub name: String,
    pub run: StageFn,
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("position", &self.position)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    stages: BTreeMap<u32, StageDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stages every database is built with.
    pub fn standard() -> Result<Self, BuildError> {
        let mut registry = Self::new();
        registry.register(100, "ndb-drops", drops::run)?;
        registry.register(200, "device", device::run)?;
        registry.register(600, "sdevice", short::sdevice)?;
        registry.register(610, "sfdb", short::sfdb)?;
        registry.register(620, "srfdb", short::srfdb)?;
        registry.register(630, "sswport", short::sswport)?;
        registry.register(640, "snei", short::snei)?;
        registry.register(810, "hiface", hiface::run)?;
        Ok(registry)
    }

    pub fn register<F>(&mut self, position: u32, name: &str, run: F) -> Result<(), BuildError>
    where
        F: Fn(&mut Build) -> Result<(), BuildError> + Send + Sync + 'static,
    {
        if self.stages.contains_key(&position) {
            return Err(BuildError::PositionTaken {
                position,
                name: name.to_string(),
            });
        }
        self.stages.insert(
            position,
            StageDef {
                position,
                name: name.to_string(),
                run: Arc::new(run),
            },
        );
        Ok(())
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDef> {
        self.stages.values()
    }

    /// Run every stage in order over `ndb`.
    pub fn run(&self, ndb: Arc<Ndb>, opts: BuildOptions) -> Result<Database, BuildError> {
        let span = info_span!("build", lid = %opts.label);
        let _enter = span.enter();

        let started = Instant::now();
        let mut build = Build::new(ndb, opts);
        for stage in self.stages.values() {
            info!(stage = %stage.name, position = stage.position, "running builder");
            let t0 = Instant::now();
            if let Err(err) = (stage.run)(&mut build) {
                error!(stage = %stage.name, position = stage.position, error = %err, "builder failed");
                error!("build failed");
                return Err(match err {
                    err @ BuildError::Stage { .. } => err,
                    other => BuildError::Stage {
                        name: stage.name.clone(),
                        message: other.to_string(),
                    },
                });
            }
            info!(
                stage = %stage.name,
                position = stage.position,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "builder success"
            );
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "build success");

        Ok(Database {
            tables: build.db,
            to_resolve: build.to_resolve,
            ndb: build.ndb,
        })
    }
}

/// A built database.
#[derive(Debug, Clone, Serialize)]
pub struct Database {
    #[serde(flatten)]
    pub tables: Tables,
    #[serde(rename = "toResolve")]
    pub to_resolve: Vec<Unresolved>,
    /// Input tables, after sanitation.
    #[serde(skip)]
    pub ndb: Arc<Ndb>,
}

impl Database {
    pub fn table(&self, name: &str) -> Option<&crate::Node> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn queries<'a>(&'a self, vendors: &'a dyn VendorLookup) -> Queries<'a> {
        Queries::new(&self.tables, vendors)
    }
}
