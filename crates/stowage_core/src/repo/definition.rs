//! Surface for attaching repository behavior to application types.
//!
//! An application repository owns a `Repository<E>` in a private field and
//! implements `DomainRepository`; callers get the always-public persistence
//! operations from the trait plus whatever intention-revealing methods the
//! author writes on top of `Repository::query`/`exclude`/`fetch`.

use crate::adapter::TransactionOptions;
use crate::error::RepoResult;
use crate::model::entity::{Entity, EntityId};
use crate::repo::repository::Repository;
use once_cell::sync::Lazy;
use regex::Regex;

static WORD_BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid word boundary regex"));

/// Application-level repository over one entity type.
pub trait DomainRepository {
    type Entity: Entity;

    fn repository(&self) -> &Repository<Self::Entity>;

    fn persist(&self, entity: Self::Entity) -> RepoResult<Self::Entity> {
        self.repository().persist(entity)
    }

    fn create(&self, entity: Self::Entity) -> RepoResult<Option<Self::Entity>> {
        self.repository().create(entity)
    }

    fn update(&self, entity: Self::Entity) -> RepoResult<Self::Entity> {
        self.repository().update(entity)
    }

    fn delete(&self, entity: Self::Entity) -> RepoResult<Self::Entity> {
        self.repository().delete(entity)
    }

    fn find(&self, id: EntityId) -> RepoResult<Option<Self::Entity>> {
        self.repository().find(id)
    }

    fn all(&self) -> RepoResult<Vec<Self::Entity>> {
        self.repository().all()
    }

    fn first(&self) -> RepoResult<Option<Self::Entity>> {
        self.repository().first()
    }

    fn last(&self) -> RepoResult<Option<Self::Entity>> {
        self.repository().last()
    }

    fn clear(&self) -> RepoResult<()> {
        self.repository().clear()
    }

    fn transaction<T, F>(&self, options: TransactionOptions, block: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>,
    {
        self.repository().transaction(options, block)
    }
}

/// Snake-case plural of `E`'s type name: `BookAuthor` -> `book_authors`.
pub fn default_collection_name<E>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    pluralize(&to_snake_case(short))
}

fn to_snake_case(name: &str) -> String {
    WORD_BOUNDARY_RE
        .replace_all(name, "${1}_${2}")
        .to_ascii_lowercase()
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) && !stem.is_empty() {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| word.ends_with(suffix))
    {
        return format!("{word}es");
    }
    format!("{word}s")
}
