//! Command-line front end over `stowage_core` repositories.
//!
//! # Responsibility
//! - Wire config, logging and an adapter from flags/env.
//! - Print one JSON value per line on stdout; diagnostics go to the logger.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use stowage_core::{
    build_adapter, init_logging, Adapter, AdapterConfig, DomainRepository, Entity, EntityId,
    RawRow, RepoResult, Repository, SqliteAdapter, StowageConfig,
};

#[derive(Debug, Parser)]
#[command(name = "stowage", version, about = "Inspect and edit stowage collections")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Adapter URL: null | memory | sqlite::memory: | sqlite://<path>
    #[arg(long, global = true, env = "STOWAGE_ADAPTER")]
    adapter: Option<AdapterConfig>,

    /// Overrides the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print core version and liveness
    Ping,
    /// Create a document from a JSON object
    Insert { collection: String, json: String },
    /// List documents, ordered by id unless `--order-by` is given
    List {
        collection: String,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count documents
    Count { collection: String },
    /// Remove every document from a collection
    Clear { collection: String },
    /// Run a raw statement and print each returned row
    Fetch { statement: String },
    /// Run a raw statement that returns nothing
    Execute { statement: String },
    /// List collections materialized in a SQLite database
    Collections,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Insert { .. } => "insert",
            Self::List { .. } => "list",
            Self::Count { .. } => "count",
            Self::Clear { .. } => "clear",
            Self::Fetch { .. } => "fetch",
            Self::Execute { .. } => "execute",
            Self::Collections => "collections",
        }
    }
}

/// Raw statements are not bound to a collection; this name is never written.
const RAW_COLLECTION: &str = "documents";

/// Schemaless document: any JSON object plus the storage id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EntityId>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Entity for Document {
    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}

/// Documents of one collection, with the operations the commands need.
struct DocumentRepository {
    documents: Repository<Document>,
}

impl DomainRepository for DocumentRepository {
    type Entity = Document;

    fn repository(&self) -> &Repository<Document> {
        &self.documents
    }
}

impl DocumentRepository {
    fn new(adapter: &Arc<dyn Adapter>, collection: impl Into<Arc<str>>) -> Self {
        Self {
            documents: Repository::with_collection(Arc::clone(adapter), collection),
        }
    }

    /// Ordered by id unless `order_by` names a field.
    fn page(&self, order_by: Option<String>, limit: Option<usize>) -> RepoResult<Vec<Document>> {
        self.documents
            .query(|query| {
                let query = match order_by {
                    Some(field) => query.order_by(field),
                    None => query,
                };
                match limit {
                    Some(limit) => query.limit(limit),
                    None => query,
                }
            })?
            .all()
    }

    fn count(&self) -> RepoResult<u64> {
        self.documents.query(|query| query)?.count()
    }

    fn raw_rows(&self, statement: &str) -> RepoResult<Vec<RawRow>> {
        self.documents.fetch(statement)
    }

    fn run(&self, statement: &str) -> RepoResult<()> {
        self.documents.execute(statement)
    }
}

fn main() {
    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => StowageConfig::load(path)?,
        None => StowageConfig::default(),
    };
    if let Some(adapter) = cli.adapter {
        config.adapter = adapter;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging).map_err(anyhow::Error::msg)?;

    if let Command::Ping = cli.command {
        print_json(&serde_json::json!({
            "ping": stowage_core::ping(),
            "version": stowage_core::core_version(),
        }))?;
        return Ok(());
    }
    if let Command::Collections = cli.command {
        return print_collections(&config.adapter);
    }

    let adapter = build_adapter(&config.adapter).context("failed to build adapter")?;
    info!(
        "event=cli_command module=cli status=start command={} adapter={}",
        cli.command.name(),
        adapter.name()
    );
    match cli.command {
        Command::Insert { collection, json } => {
            let document: Document =
                serde_json::from_str(&json).context("document must be a JSON object")?;
            if document.id.is_some() {
                bail!("document already carries an id; insert only creates new documents");
            }
            let created = DocumentRepository::new(&adapter, collection)
                .create(document)?
                .context("document was not created")?;
            print_json(&created)?;
        }
        Command::List {
            collection,
            order_by,
            limit,
        } => {
            for document in DocumentRepository::new(&adapter, collection).page(order_by, limit)? {
                print_json(&document)?;
            }
        }
        Command::Count { collection } => {
            print_json(&DocumentRepository::new(&adapter, collection).count()?)?;
        }
        Command::Clear { collection } => {
            DocumentRepository::new(&adapter, collection).clear()?;
        }
        Command::Fetch { statement } => {
            for row in DocumentRepository::new(&adapter, RAW_COLLECTION).raw_rows(&statement)? {
                print_json(&row)?;
            }
        }
        Command::Execute { statement } => {
            DocumentRepository::new(&adapter, RAW_COLLECTION).run(&statement)?;
        }
        Command::Ping | Command::Collections => {}
    }
    Ok(())
}

fn print_collections(config: &AdapterConfig) -> anyhow::Result<()> {
    let adapter = match config {
        AdapterConfig::Sqlite { path } => SqliteAdapter::open(path)?,
        AdapterConfig::SqliteMemory => SqliteAdapter::open_in_memory()?,
        AdapterConfig::Null | AdapterConfig::Memory => {
            bail!("`collections` requires a sqlite adapter")
        }
    };
    for name in adapter.collections()? {
        print_json(&name)?;
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
