//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stowage_core::{
    Adapter, Aggregate, EntityId, MemoryAdapter, QueryCapabilities, QueryPlan, QuerySource,
    RawRow, Record, RepoResult, TransactionBlock, TransactionOptions,
};

/// Memory-backed adapter that counts every storage call.
#[derive(Clone)]
pub struct SpyAdapter {
    inner: MemoryAdapter,
    calls: Arc<AtomicUsize>,
    negation: bool,
}

impl SpyAdapter {
    pub fn new(negation: bool) -> Self {
        Self {
            inner: MemoryAdapter::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            negation,
        }
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl Adapter for SpyAdapter {
    fn name(&self) -> &'static str {
        "spy"
    }

    fn create(&self, collection: &str, record: Record) -> RepoResult<Record> {
        self.hit();
        self.inner.create(collection, record)
    }

    fn update(&self, collection: &str, record: Record) -> RepoResult<Record> {
        self.hit();
        self.inner.update(collection, record)
    }

    fn delete(&self, collection: &str, id: EntityId) -> RepoResult<()> {
        self.hit();
        self.inner.delete(collection, id)
    }

    fn find(&self, collection: &str, id: EntityId) -> RepoResult<Option<Record>> {
        self.hit();
        self.inner.find(collection, id)
    }

    fn all(&self, collection: &str) -> RepoResult<Vec<Record>> {
        self.hit();
        self.inner.all(collection)
    }

    fn first(&self, collection: &str) -> RepoResult<Option<Record>> {
        self.hit();
        self.inner.first(collection)
    }

    fn last(&self, collection: &str) -> RepoResult<Option<Record>> {
        self.hit();
        self.inner.last(collection)
    }

    fn clear(&self, collection: &str) -> RepoResult<()> {
        self.hit();
        self.inner.clear(collection)
    }

    fn transaction(
        &self,
        options: &TransactionOptions,
        block: TransactionBlock<'_>,
    ) -> RepoResult<()> {
        self.inner.transaction(options, block)
    }

    fn query(&self, _collection: &str) -> RepoResult<Arc<dyn QuerySource>> {
        Ok(Arc::new(self.clone()))
    }

    fn execute(&self, statement: &str) -> RepoResult<()> {
        self.hit();
        self.inner.execute(statement)
    }

    fn fetch(&self, statement: &str) -> RepoResult<Vec<RawRow>> {
        self.hit();
        self.inner.fetch(statement)
    }
}

impl QuerySource for SpyAdapter {
    fn adapter_name(&self) -> &'static str {
        "spy"
    }

    fn capabilities(&self) -> QueryCapabilities {
        QueryCapabilities {
            negation: self.negation,
        }
    }

    fn select(&self, collection: &str, plan: &QueryPlan) -> RepoResult<Vec<Record>> {
        self.hit();
        QuerySource::select(&self.inner, collection, plan)
    }

    fn count(&self, collection: &str, plan: &QueryPlan) -> RepoResult<u64> {
        self.hit();
        QuerySource::count(&self.inner, collection, plan)
    }

    fn aggregate(
        &self,
        collection: &str,
        plan: &QueryPlan,
        function: Aggregate,
        field: &str,
    ) -> RepoResult<Option<f64>> {
        self.hit();
        self.inner.aggregate(collection, plan, function, field)
    }
}
