//! Storage-agnostic repository layer.
//! Domain entities stay plain data; repositories mediate persistence through
//! pluggable adapters.

pub mod adapter;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;

pub use adapter::{
    build_adapter, Adapter, MemoryAdapter, NullAdapter, SqliteAdapter, TransactionBlock,
    TransactionMode, TransactionOptions,
};
pub use config::{AdapterConfig, ConfigError, LoggingConfig, StowageConfig};
pub use error::{RepoError, RepoResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, EntityId, Timestamps};
pub use model::record::{RawRow, Record};
pub use query::condition::{CompareOp, Condition};
pub use query::{
    Aggregate, Query, QueryCapabilities, QueryPlan, QuerySource, SortDirection, SortField,
};
pub use repo::clock::{Clock, SystemClock};
pub use repo::definition::{default_collection_name, DomainRepository};
pub use repo::repository::Repository;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
