//! nscandb CLI
//!
//! Command-line access to the database cache:
//! - Listing entities and their scan databases
//! - Building a database and dumping its tables as JSON
//! - Showing the conflicts a build left unresolved

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use nscandb_builder::Database;
use nscandb_storage::{CacheConfig, DbCache};
use serde_json::{Map, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Tables printed by `build` when none are named.
const EXPOSED_TABLES: [&str; 12] = [
    "device", "sdevice", "swport", "sswport", "fdb", "sfdb", "rfdb", "srfdb", "nei", "snei", "rarp",
    "hiface",
];

#[derive(Parser)]
#[command(name = "nscandb")]
#[command(author, version, about = "nscandb: network scan databases")]
struct Cli {
    /// JSON config file (missing keys take defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data root, one directory per entity
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG (e.g. `debug`, `nscandb_builder=trace`)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entities
    Entities,

    /// List the databases of an entity
    Databases { entity: String },

    /// Build (or fetch) a database and print tables as JSON
    Build {
        entity: String,
        id: String,
        /// Table to print; repeat for several (default: all served tables)
        #[arg(short, long = "table")]
        tables: Vec<String>,
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
        /// Include the parsed input tables
        #[arg(long)]
        with_ndb: bool,
    },

    /// Print the conflicts a build could not resolve
    Unresolved {
        entity: String,
        id: String,
        #[arg(long)]
        pretty: bool,
    },
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    // one-shot process, nothing to refresh
    config.watch = false;
    Ok(config)
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

async fn fetch(cache: &DbCache, entity: &str, id: &str) -> Result<std::sync::Arc<Database>> {
    info!(entity, id, "loading database");
    let db = match cache.get_db(entity, id, false).await {
        Ok(db) => db,
        Err(err) => {
            error!(entity, id, error = %err, "cannot load database");
            return Err(err).with_context(|| format!("building {entity}/{id}"));
        }
    };
    let db = db.ok_or_else(|| anyhow!("no database {id:?} for entity {entity:?}"))?;
    info!(
        entity,
        id,
        tables = db.tables.len(),
        unresolved = db.to_resolve.len(),
        "database ready"
    );
    Ok(db)
}

fn select_tables(db: &Database, names: &[String], with_ndb: bool) -> Result<Value> {
    let names: Vec<&str> = if names.is_empty() {
        EXPOSED_TABLES.to_vec()
    } else {
        names.iter().map(String::as_str).collect()
    };
    let mut out = Map::new();
    for name in names {
        let table = db
            .table(name)
            .ok_or_else(|| anyhow!("unknown table {name:?}"))?;
        out.insert(name.to_string(), serde_json::to_value(table)?);
    }
    out.insert("toResolve".to_string(), serde_json::to_value(&db.to_resolve)?);
    if with_ndb {
        out.insert("ndb".to_string(), Value::Object((*db.ndb).clone()));
    }
    Ok(Value::Object(out))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let cache = DbCache::new(load_config(&cli)?)?;

    match cli.command {
        Commands::Entities => {
            for entity in cache.entity_list()?.iter() {
                println!("{entity}");
            }
        }
        Commands::Databases { entity } => {
            let ids = cache
                .db_list(&entity)
                .with_context(|| format!("listing {entity}"))?;
            if ids.is_empty() {
                eprintln!("{} no databases for {}", "info:".yellow().bold(), entity.bold());
            }
            for id in ids.iter() {
                println!("{id}");
            }
        }
        Commands::Build {
            entity,
            id,
            tables,
            pretty,
            with_ndb,
        } => {
            let db = fetch(&cache, &entity, &id).await?;
            print_json(&select_tables(&db, &tables, with_ndb)?, pretty)?;
            if !db.to_resolve.is_empty() {
                eprintln!(
                    "{} {} unresolved conflicts",
                    "warning:".yellow().bold(),
                    db.to_resolve.len()
                );
            }
        }
        Commands::Unresolved { entity, id, pretty } => {
            let db = fetch(&cache, &entity, &id).await?;
            if db.to_resolve.is_empty() {
                eprintln!("{} nothing to resolve", "ok".green().bold());
                return Ok(());
            }
            print_json(&serde_json::to_value(&db.to_resolve)?, pretty)?;
        }
    }
    Ok(())
}
