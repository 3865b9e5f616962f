//! Storage adapter contract and bundled backends.
//!
//! # Responsibility
//! - Define the capability interface every backend implements.
//! - Build a configured adapter from `AdapterConfig`.
//!
//! # Invariants
//! - Adapters are authoritative for storage, ordering and concurrency; the
//!   repository layer adds only identity/timestamp policy on top.
//! - Missing optional capabilities (`execute`, `fetch`, negation) fail with
//!   `RepoError::UnsupportedOperation`, never silently.
//! - `update`/`delete` of an id that is not stored fail with `NotFound`.
//! - An open transaction belongs to one thread; other threads wait for it to
//!   finish before touching the adapter.

pub mod memory;
pub mod null;
pub mod sqlite;

use crate::config::AdapterConfig;
use crate::error::{RepoError, RepoResult};
use crate::model::entity::EntityId;
use crate::model::record::{RawRow, Record};
use crate::query::QuerySource;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::thread::{self, ThreadId};

pub use memory::MemoryAdapter;
pub use null::NullAdapter;
pub use sqlite::SqliteAdapter;

static COLLECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid collection regex"));

/// Lock mode requested for a transaction. Backends without locking ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

/// Options forwarded verbatim to `Adapter::transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub mode: TransactionMode,
}

/// Scoped unit of work run inside `Adapter::transaction`.
pub type TransactionBlock<'a> = &'a mut dyn FnMut() -> RepoResult<()>;

/// Capability interface every storage backend implements.
pub trait Adapter: Send + Sync {
    /// Short stable name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Stores a new record and returns it with an assigned id.
    fn create(&self, collection: &str, record: Record) -> RepoResult<Record>;

    /// Replaces the stored fields of `record.id`.
    fn update(&self, collection: &str, record: Record) -> RepoResult<Record>;

    /// Create-or-update keyed on identity presence.
    fn persist(&self, collection: &str, record: Record) -> RepoResult<Record> {
        if record.id.is_some() {
            self.update(collection, record)
        } else {
            self.create(collection, record)
        }
    }

    fn delete(&self, collection: &str, id: EntityId) -> RepoResult<()>;

    fn find(&self, collection: &str, id: EntityId) -> RepoResult<Option<Record>>;

    /// Every record, ordered by id.
    fn all(&self, collection: &str) -> RepoResult<Vec<Record>>;

    fn first(&self, collection: &str) -> RepoResult<Option<Record>>;

    fn last(&self, collection: &str) -> RepoResult<Option<Record>>;

    fn clear(&self, collection: &str) -> RepoResult<()>;

    /// Runs `block` as one atomic unit; an `Err` from the block rolls back
    /// and is returned unchanged.
    fn transaction(&self, options: &TransactionOptions, block: TransactionBlock<'_>)
        -> RepoResult<()>;

    /// Returns a query source bound to `collection`. Must not touch storage.
    fn query(&self, collection: &str) -> RepoResult<Arc<dyn QuerySource>>;

    fn execute(&self, statement: &str) -> RepoResult<()>;

    fn fetch(&self, statement: &str) -> RepoResult<Vec<RawRow>>;
}

/// Thread holding an adapter's open transaction, and its nesting depth.
///
/// Lives inside the adapter's state mutex; callers park on a `Condvar` while
/// `admits_current` is false.
#[derive(Debug, Default)]
pub(crate) struct TransactionOwner {
    thread: Option<ThreadId>,
    depth: u32,
}

impl TransactionOwner {
    /// No transaction is open, or the calling thread opened it.
    pub(crate) fn admits_current(&self) -> bool {
        self.thread
            .map_or(true, |owner| owner == thread::current().id())
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    /// Claims the adapter for the calling thread. Returns the new depth.
    pub(crate) fn enter(&mut self) -> u32 {
        self.thread = Some(thread::current().id());
        self.depth += 1;
        self.depth
    }

    /// Closes one level. Returns `true` once the outermost unit is closed and
    /// waiting threads must be woken.
    pub(crate) fn leave(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.thread = None;
            return true;
        }
        false
    }
}

/// Builds the adapter described by `config`.
pub fn build_adapter(config: &AdapterConfig) -> RepoResult<Arc<dyn Adapter>> {
    let adapter: Arc<dyn Adapter> = match config {
        AdapterConfig::Null => Arc::new(NullAdapter),
        AdapterConfig::Memory => Arc::new(MemoryAdapter::new()),
        AdapterConfig::SqliteMemory => Arc::new(SqliteAdapter::open_in_memory()?),
        AdapterConfig::Sqlite { path } => Arc::new(SqliteAdapter::open(path)?),
    };
    info!(
        "event=adapter_build module=adapter status=ok adapter={}",
        adapter.name()
    );
    Ok(adapter)
}

/// Collection names become table names, so they must be plain identifiers.
pub(crate) fn validate_collection(collection: &str) -> RepoResult<()> {
    if COLLECTION_RE.is_match(collection) {
        Ok(())
    } else {
        Err(RepoError::InvalidCollection(collection.to_string()))
    }
}
