//! Storage-agnostic repository facade.
//!
//! # Responsibility
//! - Apply identity and timestamp policy before delegating to the adapter.
//! - Bind one collection to one adapter and hand out typed queries over it.
//!
//! # Invariants
//! - `update`/`delete` never reach the adapter for unpersisted entities.
//! - `create` on a persisted entity is a no-op returning `Ok(None)`.
//! - One clock read per write, so `created_at == updated_at` on creation.
//! - The adapter is fixed at construction; `with_adapter` returns a new
//!   binding and leaves clones untouched.
//!
//! # Repository-author surface
//! `query`, `exclude`, `execute`, `fetch` and `fetch_each` are building
//! blocks for `DomainRepository` implementations. Application code calls the
//! named methods those implementations expose, never these directly.

use crate::adapter::{Adapter, NullAdapter, TransactionOptions};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Entity, EntityId};
use crate::model::record::{RawRow, Record};
use crate::query::Query;
use crate::repo::clock::{Clock, SystemClock};
use crate::repo::definition::default_collection_name;
use log::{debug, warn};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// Repository bound to one collection and one adapter.
pub struct Repository<E> {
    collection: Arc<str>,
    adapter: Arc<dyn Adapter>,
    clock: Arc<dyn Clock>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
            adapter: Arc::clone(&self.adapter),
            clock: Arc::clone(&self.clock),
            _entity: PhantomData,
        }
    }
}

impl<E> Debug for Repository<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &self.collection)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

/// Unconfigured repository: every delegated call fails loudly.
impl<E: Entity> Default for Repository<E> {
    fn default() -> Self {
        Self::new(Arc::new(NullAdapter))
    }
}

impl<E: Entity> Repository<E> {
    /// Binds the collection derived from `E`'s type name.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self::with_collection(adapter, default_collection_name::<E>())
    }

    pub fn with_collection(adapter: Arc<dyn Adapter>, collection: impl Into<Arc<str>>) -> Self {
        Self {
            collection: collection.into(),
            adapter,
            clock: Arc::new(SystemClock),
            _entity: PhantomData,
        }
    }

    /// Same collection and clock, different adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Creates or updates depending on identity presence.
    pub fn persist(&self, mut entity: E) -> RepoResult<E> {
        self.touch(&mut entity);
        let record = self.adapter.persist(&self.collection, Record::from_entity(&entity)?);
        let stored = self.observe("persist", record)?;
        stored.into_entity()
    }

    /// Creates an unpersisted entity.
    ///
    /// Returns `Ok(None)` without any write when `entity` already has an id;
    /// callers must branch on that.
    pub fn create(&self, mut entity: E) -> RepoResult<Option<E>> {
        if self.is_persisted(&entity) {
            debug!(
                "event=repo_create module=repo status=skipped collection={} reason=already_persisted",
                self.collection
            );
            return Ok(None);
        }

        self.touch(&mut entity);
        let record = self.adapter.create(&self.collection, Record::from_entity(&entity)?);
        let stored = self.observe("create", record)?;
        stored.into_entity().map(Some)
    }

    /// Updates a persisted entity, refreshing `updated_at`.
    ///
    /// # Errors
    /// - `NonPersistedEntity` when `entity` has no id; nothing is touched.
    pub fn update(&self, mut entity: E) -> RepoResult<E> {
        self.require_persisted(&entity)?;
        self.touch(&mut entity);
        let record = self.adapter.update(&self.collection, Record::from_entity(&entity)?);
        let stored = self.observe("update", record)?;
        stored.into_entity()
    }

    /// Deletes a persisted entity and hands it back unchanged.
    pub fn delete(&self, entity: E) -> RepoResult<E> {
        let id = self.require_persisted(&entity)?;
        self.adapter.delete(&self.collection, id).inspect_err(|err| {
            warn!(
                "event=repo_delete module=repo status=error collection={} id={id} error_code={}",
                self.collection,
                err.code()
            );
        })?;
        debug!(
            "event=repo_delete module=repo status=ok collection={} id={id}",
            self.collection
        );
        Ok(entity)
    }

    pub fn find(&self, id: EntityId) -> RepoResult<Option<E>> {
        self.adapter
            .find(&self.collection, id)?
            .map(Record::into_entity)
            .transpose()
    }

    pub fn all(&self) -> RepoResult<Vec<E>> {
        self.adapter
            .all(&self.collection)?
            .into_iter()
            .map(Record::into_entity)
            .collect()
    }

    pub fn first(&self) -> RepoResult<Option<E>> {
        self.adapter
            .first(&self.collection)?
            .map(Record::into_entity)
            .transpose()
    }

    pub fn last(&self) -> RepoResult<Option<E>> {
        self.adapter
            .last(&self.collection)?
            .map(Record::into_entity)
            .transpose()
    }

    /// Removes every record in the collection. Irreversible.
    pub fn clear(&self) -> RepoResult<()> {
        self.adapter.clear(&self.collection)?;
        debug!(
            "event=repo_clear module=repo status=ok collection={}",
            self.collection
        );
        Ok(())
    }

    /// Runs `block` as one adapter-defined atomic unit.
    ///
    /// The repository adds no transactional logic; an `Err` from `block`
    /// rolls back and is returned as-is.
    pub fn transaction<T, F>(&self, options: TransactionOptions, block: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>,
    {
        let mut block = Some(block);
        let mut output = None;
        self.adapter.transaction(&options, &mut || {
            let run = block.take().ok_or_else(|| {
                RepoError::InvalidData("transaction block invoked twice".to_string())
            })?;
            output = Some(run()?);
            Ok(())
        })?;
        output.ok_or_else(|| RepoError::InvalidData("transaction block did not run".to_string()))
    }

    /// Builds a lazy query over this collection.
    ///
    /// Meant for repository authors; expose intention-revealing methods on
    /// top of it rather than the query itself.
    pub fn query(&self, build: impl FnOnce(Query<E>) -> Query<E>) -> RepoResult<Query<E>> {
        let source = self.adapter.query(&self.collection)?;
        Ok(build(Query::new(Arc::clone(&self.collection), source)))
    }

    /// Negated copy of `query`.
    ///
    /// # Errors
    /// - `UnsupportedOperation` when the backend cannot negate.
    pub fn exclude(&self, query: Query<E>) -> RepoResult<Query<E>> {
        query.negate()
    }

    /// Runs a raw statement with no result. Repository-author surface.
    pub fn execute(&self, statement: &str) -> RepoResult<()> {
        self.adapter.execute(statement)
    }

    /// Runs a raw statement and returns rows without entity mapping.
    /// Repository-author surface.
    pub fn fetch(&self, statement: &str) -> RepoResult<Vec<RawRow>> {
        self.adapter.fetch(statement)
    }

    /// Like `fetch`, invoking `each` once per row. Returns the row count.
    pub fn fetch_each(&self, statement: &str, mut each: impl FnMut(&RawRow)) -> RepoResult<usize> {
        let rows = self.adapter.fetch(statement)?;
        rows.iter().for_each(&mut each);
        Ok(rows.len())
    }

    fn is_persisted(&self, entity: &E) -> bool {
        entity.is_persisted()
    }

    fn require_persisted(&self, entity: &E) -> RepoResult<EntityId> {
        entity.id().ok_or_else(|| RepoError::NonPersistedEntity {
            collection: self.collection.to_string(),
        })
    }

    /// Timestamp policy; entities without timestamp support are untouched.
    fn touch(&self, entity: &mut E) {
        if let Some(timestamps) = entity.timestamps_mut() {
            timestamps.touch(self.clock.now());
        }
    }

    fn observe(&self, operation: &'static str, result: RepoResult<Record>) -> RepoResult<Record> {
        match &result {
            Ok(record) => debug!(
                "event=repo_{operation} module=repo status=ok collection={} id={:?}",
                self.collection, record.id
            ),
            Err(err) => warn!(
                "event=repo_{operation} module=repo status=error collection={} adapter={} error_code={}",
                self.collection,
                self.adapter.name(),
                err.code()
            ),
        }
        result
    }
}
