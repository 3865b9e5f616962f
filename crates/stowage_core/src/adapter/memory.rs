//! In-process adapter backed by ordered maps.
//!
//! # Responsibility
//! - Provide a storage-free backend for tests and ephemeral use.
//! - Evaluate query plans in process with the same semantics as SQL backends.
//!
//! # Invariants
//! - Ids are assigned per collection, starting at 1, and never reused (not
//!   even after `clear`).
//! - A failed transaction restores the whole store to its pre-block snapshot.
//!   Other threads wait while a transaction is open, so no foreign write is
//!   lost to the restore.
//! - Reads never create collections.
//! - `execute`/`fetch` are unsupported: there is no raw statement language.

use super::{
    validate_collection, Adapter, TransactionBlock, TransactionOptions, TransactionOwner,
};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::EntityId;
use crate::model::record::{RawRow, Record};
use crate::query::condition::{as_number, compare_values};
use crate::query::{Aggregate, QueryPlan, QuerySource, SortDirection, SortField};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

const NAME: &str = "memory";

#[derive(Debug, Clone, Default)]
struct MemoryCollection {
    records: BTreeMap<EntityId, Map<String, Value>>,
    last_id: EntityId,
}

impl MemoryCollection {
    fn record(id: EntityId, fields: &Map<String, Value>) -> Record {
        Record::new(Some(id), fields.clone())
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: BTreeMap<String, MemoryCollection>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    store: MemoryState,
    transaction: TransactionOwner,
}

/// In-memory adapter. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    state: Arc<Mutex<MemoryInner>>,
    turn: Arc<Condvar>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store, waiting while another thread's transaction is open.
    fn lock(&self) -> RepoResult<MutexGuard<'_, MemoryInner>> {
        let inner = self
            .state
            .lock()
            .map_err(|_| RepoError::LockPoisoned("memory adapter"))?;
        self.turn
            .wait_while(inner, |inner| !inner.transaction.admits_current())
            .map_err(|_| RepoError::LockPoisoned("memory adapter"))
    }

    /// Write access; creates the collection on first use.
    fn with_collection<T>(
        &self,
        collection: &str,
        operation: impl FnOnce(&mut MemoryCollection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        validate_collection(collection)?;
        let mut inner = self.lock()?;
        let entry = inner
            .store
            .collections
            .entry(collection.to_string())
            .or_default();
        operation(entry)
    }

    /// Access to a collection only if it already exists.
    fn with_existing<T>(
        &self,
        collection: &str,
        operation: impl FnOnce(Option<&mut MemoryCollection>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        validate_collection(collection)?;
        let mut inner = self.lock()?;
        operation(inner.store.collections.get_mut(collection))
    }

    fn snapshot(&self, collection: &str) -> RepoResult<Vec<Record>> {
        self.with_existing(collection, |stored| {
            Ok(stored
                .map(|stored| {
                    stored
                        .records
                        .iter()
                        .map(|(id, fields)| MemoryCollection::record(*id, fields))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn matching(&self, collection: &str, plan: &QueryPlan) -> RepoResult<Vec<Record>> {
        Ok(apply_plan(self.snapshot(collection)?, plan))
    }
}

impl Adapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn create(&self, collection: &str, record: Record) -> RepoResult<Record> {
        let created = self.with_collection(collection, |stored| {
            stored.last_id += 1;
            let id = stored.last_id;
            stored.records.insert(id, record.fields.clone());
            Ok(Record::new(Some(id), record.fields))
        })?;
        debug!(
            "event=adapter_create module=adapter status=ok adapter={NAME} collection={collection} id={:?}",
            created.id
        );
        Ok(created)
    }

    fn update(&self, collection: &str, record: Record) -> RepoResult<Record> {
        let id = record.id.ok_or_else(|| RepoError::NonPersistedEntity {
            collection: collection.to_string(),
        })?;
        self.with_existing(collection, |stored| {
            match stored.and_then(|stored| stored.records.get_mut(&id)) {
                Some(fields) => {
                    *fields = record.fields.clone();
                    Ok(record)
                }
                None => Err(RepoError::NotFound {
                    collection: collection.to_string(),
                    id,
                }),
            }
        })
    }

    fn delete(&self, collection: &str, id: EntityId) -> RepoResult<()> {
        self.with_existing(collection, |stored| {
            match stored.and_then(|stored| stored.records.remove(&id)) {
                Some(_) => Ok(()),
                None => Err(RepoError::NotFound {
                    collection: collection.to_string(),
                    id,
                }),
            }
        })
    }

    fn find(&self, collection: &str, id: EntityId) -> RepoResult<Option<Record>> {
        self.with_existing(collection, |stored| {
            Ok(stored.and_then(|stored| {
                stored
                    .records
                    .get(&id)
                    .map(|fields| MemoryCollection::record(id, fields))
            }))
        })
    }

    fn all(&self, collection: &str) -> RepoResult<Vec<Record>> {
        self.snapshot(collection)
    }

    fn first(&self, collection: &str) -> RepoResult<Option<Record>> {
        self.with_existing(collection, |stored| {
            Ok(stored.and_then(|stored| {
                stored
                    .records
                    .iter()
                    .next()
                    .map(|(id, fields)| MemoryCollection::record(*id, fields))
            }))
        })
    }

    fn last(&self, collection: &str) -> RepoResult<Option<Record>> {
        self.with_existing(collection, |stored| {
            Ok(stored.and_then(|stored| {
                stored
                    .records
                    .iter()
                    .next_back()
                    .map(|(id, fields)| MemoryCollection::record(*id, fields))
            }))
        })
    }

    /// Keeps the collection's id counter, so ids are not reused.
    fn clear(&self, collection: &str) -> RepoResult<()> {
        self.with_existing(collection, |stored| {
            if let Some(stored) = stored {
                stored.records.clear();
            }
            Ok(())
        })
    }

    fn transaction(
        &self,
        _options: &TransactionOptions,
        block: TransactionBlock<'_>,
    ) -> RepoResult<()> {
        let (snapshot, depth) = {
            let mut inner = self.lock()?;
            let depth = inner.transaction.enter();
            (inner.store.clone(), depth)
        };
        let mut scope = TransactionScope {
            adapter: self,
            snapshot: Some(snapshot),
        };

        let outcome = block();
        if outcome.is_ok() {
            scope.snapshot = None;
            debug!("event=transaction module=adapter status=ok adapter={NAME} depth={depth}");
        } else {
            warn!("event=transaction module=adapter status=rolled_back adapter={NAME} depth={depth}");
        }
        drop(scope);
        outcome
    }

    fn query(&self, collection: &str) -> RepoResult<Arc<dyn QuerySource>> {
        validate_collection(collection)?;
        Ok(Arc::new(self.clone()))
    }

    fn execute(&self, _statement: &str) -> RepoResult<()> {
        Err(RepoError::unsupported(NAME, "execute"))
    }

    fn fetch(&self, _statement: &str) -> RepoResult<Vec<RawRow>> {
        Err(RepoError::unsupported(NAME, "fetch"))
    }
}

impl QuerySource for MemoryAdapter {
    fn adapter_name(&self) -> &'static str {
        NAME
    }

    fn select(&self, collection: &str, plan: &QueryPlan) -> RepoResult<Vec<Record>> {
        self.matching(collection, plan)
    }

    fn count(&self, collection: &str, plan: &QueryPlan) -> RepoResult<u64> {
        Ok(self.matching(collection, plan)?.len() as u64)
    }

    fn aggregate(
        &self,
        collection: &str,
        plan: &QueryPlan,
        function: Aggregate,
        field: &str,
    ) -> RepoResult<Option<f64>> {
        let mut numbers = Vec::new();
        for record in self.matching(collection, plan)? {
            match record.get(field) {
                None | Some(Value::Null) => {}
                Some(value) => numbers.push(as_number(&value).ok_or_else(|| {
                    RepoError::invalid_query(
                        format!("{}({field})", function.as_sql()),
                        format!("non-numeric value {value}"),
                    )
                })?),
            }
        }

        if numbers.is_empty() {
            return Ok(None);
        }
        let result = match function {
            Aggregate::Average => numbers.iter().sum::<f64>() / numbers.len() as f64,
            Aggregate::Sum => numbers.iter().sum(),
            Aggregate::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        Ok(Some(result))
    }
}

/// Closes one transaction level: puts the pre-block snapshot back unless the
/// block committed, then releases the adapter to other threads.
struct TransactionScope<'a> {
    adapter: &'a MemoryAdapter,
    snapshot: Option<MemoryState>,
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        let mut inner = match self.adapter.state.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(snapshot) = self.snapshot.take() {
            inner.store = snapshot;
        }
        if inner.transaction.leave() {
            self.adapter.turn.notify_all();
        }
    }
}

fn apply_plan(records: Vec<Record>, plan: &QueryPlan) -> Vec<Record> {
    let mut matched: Vec<Record> = records
        .into_iter()
        .filter(|record| plan.filter.evaluate(record) == Some(true))
        .collect();
    matched.sort_by(|left, right| compare_records(left, right, &plan.order));
    matched
        .into_iter()
        .skip(plan.offset)
        .take(plan.limit.unwrap_or(usize::MAX))
        .collect()
}

fn compare_records(left: &Record, right: &Record, order: &[SortField]) -> Ordering {
    for sort in order {
        let ordering = compare_values(
            &left.get(&sort.field).unwrap_or(Value::Null),
            &right.get(&sort.field).unwrap_or(Value::Null),
        );
        let ordering = match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.id.cmp(&right.id)
}
