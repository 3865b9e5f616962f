//! Adapter installed when no storage has been configured.
//!
//! Every operation fails with `UnsupportedOperation` so a missing adapter
//! surfaces on first use instead of silently dropping writes.

use super::{Adapter, TransactionBlock, TransactionOptions};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::EntityId;
use crate::model::record::{RawRow, Record};
use crate::query::QuerySource;
use log::warn;
use std::sync::Arc;

const NAME: &str = "null";

/// Unset-adapter sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdapter;

impl NullAdapter {
    fn reject<T>(operation: &'static str) -> RepoResult<T> {
        warn!(
            "event=adapter_call module=adapter status=error adapter={NAME} operation={operation} error_code=no_adapter_configured"
        );
        Err(RepoError::unsupported(NAME, operation))
    }
}

impl Adapter for NullAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn create(&self, _collection: &str, _record: Record) -> RepoResult<Record> {
        Self::reject("create")
    }

    fn update(&self, _collection: &str, _record: Record) -> RepoResult<Record> {
        Self::reject("update")
    }

    fn persist(&self, _collection: &str, _record: Record) -> RepoResult<Record> {
        Self::reject("persist")
    }

    fn delete(&self, _collection: &str, _id: EntityId) -> RepoResult<()> {
        Self::reject("delete")
    }

    fn find(&self, _collection: &str, _id: EntityId) -> RepoResult<Option<Record>> {
        Self::reject("find")
    }

    fn all(&self, _collection: &str) -> RepoResult<Vec<Record>> {
        Self::reject("all")
    }

    fn first(&self, _collection: &str) -> RepoResult<Option<Record>> {
        Self::reject("first")
    }

    fn last(&self, _collection: &str) -> RepoResult<Option<Record>> {
        Self::reject("last")
    }

    fn clear(&self, _collection: &str) -> RepoResult<()> {
        Self::reject("clear")
    }

    fn transaction(
        &self,
        _options: &TransactionOptions,
        _block: TransactionBlock<'_>,
    ) -> RepoResult<()> {
        Self::reject("transaction")
    }

    fn query(&self, _collection: &str) -> RepoResult<Arc<dyn QuerySource>> {
        Self::reject("query")
    }

    fn execute(&self, _statement: &str) -> RepoResult<()> {
        Self::reject("execute")
    }

    fn fetch(&self, _statement: &str) -> RepoResult<Vec<RawRow>> {
        Self::reject("fetch")
    }
}
