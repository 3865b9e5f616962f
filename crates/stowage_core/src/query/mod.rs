//! Lazily-evaluated, composable queries.
//!
//! # Responsibility
//! - Describe filtered/ordered/limited reads as plain values (`QueryPlan`).
//! - Hand materialization to the backend through `QuerySource`.
//!
//! # Invariants
//! - Building a query never touches storage; only `all`, `first`, `count`,
//!   `exists` and the aggregates reach the source.
//! - Refinement returns a new `Query`; the receiver's plan is never mutated
//!   through another handle.
//! - Results are ordered by the requested fields, then by `id` ascending.

pub mod condition;

use crate::error::{RepoError, RepoResult};
use crate::model::entity::Entity;
use crate::model::record::Record;
use condition::{validate_field_path, CompareOp, Condition};
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

/// Numeric aggregate computed at materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Average,
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Average => "AVG",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// Backend-neutral description of a read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub filter: Arc<Condition>,
    pub order: Vec<SortField>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self {
            filter: Arc::new(Condition::All),
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }
}

impl QueryPlan {
    pub fn validate(&self) -> RepoResult<()> {
        self.filter.validate()?;
        self.order
            .iter()
            .try_for_each(|sort| validate_field_path(&sort.field))
    }
}

/// What a source can do beyond plain selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCapabilities {
    pub negation: bool,
}

/// Backend half of the query contract, handed out by `Adapter::query`.
///
/// Plans reaching a source have already passed `QueryPlan::validate`.
pub trait QuerySource: Send + Sync {
    fn adapter_name(&self) -> &'static str;

    fn capabilities(&self) -> QueryCapabilities {
        QueryCapabilities { negation: true }
    }

    fn select(&self, collection: &str, plan: &QueryPlan) -> RepoResult<Vec<Record>>;

    fn count(&self, collection: &str, plan: &QueryPlan) -> RepoResult<u64>;

    /// Returns `None` when no numeric value matched.
    fn aggregate(
        &self,
        collection: &str,
        plan: &QueryPlan,
        function: Aggregate,
        field: &str,
    ) -> RepoResult<Option<f64>>;
}

/// Typed, immutable query over one collection.
pub struct Query<E> {
    collection: Arc<str>,
    source: Arc<dyn QuerySource>,
    plan: QueryPlan,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
            source: Arc::clone(&self.source),
            plan: self.plan.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> Debug for Query<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection)
            .field("adapter", &self.source.adapter_name())
            .field("plan", &self.plan)
            .finish()
    }
}

impl<E: Entity> Query<E> {
    pub fn new(collection: impl Into<Arc<str>>, source: Arc<dyn QuerySource>) -> Self {
        Self {
            collection: collection.into(),
            source,
            plan: QueryPlan::default(),
            _entity: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Adds a condition, AND-ed with the current filter.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.plan.filter = Condition::and(self.plan.filter, Arc::new(condition));
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::compare(field, CompareOp::Eq, value))
    }

    pub fn where_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::compare(field, CompareOp::Ne, value))
    }

    pub fn where_gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::compare(field, CompareOp::Gt, value))
    }

    pub fn where_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::compare(field, CompareOp::Gte, value))
    }

    pub fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::compare(field, CompareOp::Lt, value))
    }

    pub fn where_lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::compare(field, CompareOp::Lte, value))
    }

    pub fn where_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.filter(Condition::IsNull(field.into()))
    }

    pub fn where_not_null(self, field: impl Into<String>) -> Self {
        self.filter(Condition::Not(Arc::new(Condition::IsNull(field.into()))))
    }

    pub fn order_by(self, field: impl Into<String>) -> Self {
        self.push_order(field.into(), SortDirection::Asc)
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.push_order(field.into(), SortDirection::Desc)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.plan.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.plan.offset = offset;
        self
    }

    /// OR-combines this query's filter with `other`'s.
    ///
    /// Ordering and paging come from `self`.
    ///
    /// # Errors
    /// - `InvalidQuery` when the two queries target different collections.
    pub fn or(mut self, other: &Query<E>) -> RepoResult<Self> {
        if self.collection != other.collection {
            return Err(RepoError::invalid_query(
                format!("{} OR {}", self.collection, other.collection),
                "cannot combine queries over different collections",
            ));
        }
        self.plan.filter = Condition::or(self.plan.filter, Arc::clone(&other.plan.filter));
        Ok(self)
    }

    /// Logical complement of the current filter.
    ///
    /// # Errors
    /// - `UnsupportedOperation` when the source cannot negate.
    pub fn negate(mut self) -> RepoResult<Self> {
        if !self.source.capabilities().negation {
            return Err(RepoError::unsupported(self.source.adapter_name(), "negate"));
        }
        self.plan.filter = Condition::not(self.plan.filter);
        Ok(self)
    }

    /// Materializes matching entities.
    pub fn all(&self) -> RepoResult<Vec<E>> {
        self.records()?
            .into_iter()
            .map(Record::into_entity)
            .collect()
    }

    /// Materializes matching records without entity mapping.
    pub fn records(&self) -> RepoResult<Vec<Record>> {
        self.plan.validate()?;
        self.source.select(&self.collection, &self.plan)
    }

    pub fn first(&self) -> RepoResult<Option<E>> {
        let narrowed = self.clone().limit(self.plan.limit.map_or(1, |limit| limit.min(1)));
        Ok(narrowed.all()?.into_iter().next())
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.plan.validate()?;
        self.source.count(&self.collection, &self.plan)
    }

    pub fn exists(&self) -> RepoResult<bool> {
        Ok(self.first()?.is_some())
    }

    pub fn average(&self, field: &str) -> RepoResult<Option<f64>> {
        self.aggregate(Aggregate::Average, field)
    }

    pub fn sum(&self, field: &str) -> RepoResult<Option<f64>> {
        self.aggregate(Aggregate::Sum, field)
    }

    pub fn min(&self, field: &str) -> RepoResult<Option<f64>> {
        self.aggregate(Aggregate::Min, field)
    }

    pub fn max(&self, field: &str) -> RepoResult<Option<f64>> {
        self.aggregate(Aggregate::Max, field)
    }

    fn aggregate(&self, function: Aggregate, field: &str) -> RepoResult<Option<f64>> {
        self.plan.validate()?;
        validate_field_path(field)?;
        self.source
            .aggregate(&self.collection, &self.plan, function, field)
    }

    fn push_order(mut self, field: String, direction: SortDirection) -> Self {
        self.plan.order.push(SortField { field, direction });
        self
    }
}
