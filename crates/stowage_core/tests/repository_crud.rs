mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::SpyAdapter;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use stowage_core::{
    Adapter, Clock, Entity, EntityId, MemoryAdapter, RepoError, Repository, SqliteAdapter,
    Timestamps,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Book {
    #[serde(default)]
    id: Option<EntityId>,
    title: String,
    #[serde(flatten)]
    timestamps: Timestamps,
}

impl Book {
    fn titled(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            timestamps: Timestamps::default(),
        }
    }
}

impl Entity for Book {
    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn timestamps(&self) -> Option<&Timestamps> {
        Some(&self.timestamps)
    }

    fn timestamps_mut(&mut self) -> Option<&mut Timestamps> {
        Some(&mut self.timestamps)
    }
}

/// Advances one minute per read.
struct StepClock {
    next: Mutex<DateTime<Utc>>,
}

impl StepClock {
    fn starting_at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(start),
        })
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + Duration::minutes(1);
        now
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn adapters() -> Vec<Arc<dyn Adapter>> {
    vec![
        Arc::new(MemoryAdapter::new()),
        Arc::new(SqliteAdapter::open_in_memory().unwrap()),
    ]
}

fn books(adapter: Arc<dyn Adapter>) -> Repository<Book> {
    Repository::new(adapter).with_clock(StepClock::starting_at(start()))
}

#[test]
fn default_collection_is_plural_type_name() {
    let repo = books(Arc::new(MemoryAdapter::new()));
    assert_eq!(repo.collection(), "books");
}

#[test]
fn create_assigns_sequential_ids_and_equal_timestamps() {
    for adapter in adapters() {
        let repo = books(adapter);

        let a = repo.create(Book::titled("A")).unwrap().unwrap();
        assert_eq!(a.id, Some(1), "adapter={}", repo.adapter_name());
        assert_eq!(a.title, "A");
        assert_eq!(a.timestamps.created_at, Some(start()));
        assert_eq!(a.timestamps.created_at, a.timestamps.updated_at);

        let b = repo.create(Book::titled("B")).unwrap().unwrap();
        assert_eq!(b.id, Some(2), "adapter={}", repo.adapter_name());
    }
}

#[test]
fn create_on_persisted_entity_returns_none_without_writing() {
    for adapter in adapters() {
        let repo = books(adapter);
        let created = repo.create(Book::titled("A")).unwrap().unwrap();

        assert!(repo.create(created.clone()).unwrap().is_none());
        assert_eq!(repo.all().unwrap(), vec![created]);
    }
}

#[test]
fn find_returns_structurally_equal_entity() {
    for adapter in adapters() {
        let repo = books(adapter);
        let created = repo.create(Book::titled("Dune")).unwrap().unwrap();

        let found = repo.find(created.id.unwrap()).unwrap();
        assert_eq!(found, Some(created));
        assert_eq!(repo.find(404).unwrap(), None);
    }
}

#[test]
fn update_advances_updated_at_only() {
    for adapter in adapters() {
        let repo = books(adapter);
        repo.create(Book::titled("A")).unwrap();

        let mut fetched = repo.find(1).unwrap().unwrap();
        let created_at = fetched.timestamps.created_at;
        fetched.title = "A, revised".to_string();

        let updated = repo.update(fetched).unwrap();
        assert_eq!(updated.id, Some(1));
        assert_eq!(updated.timestamps.created_at, created_at);
        assert!(updated.timestamps.updated_at > created_at);
        assert_eq!(repo.find(1).unwrap(), Some(updated));
    }
}

#[test]
fn update_and_delete_require_identity() {
    for adapter in adapters() {
        let repo = books(adapter);

        let update = repo.update(Book::titled("ghost")).unwrap_err();
        assert!(matches!(update, RepoError::NonPersistedEntity { .. }));

        let delete = repo.delete(Book::titled("ghost")).unwrap_err();
        assert!(matches!(delete, RepoError::NonPersistedEntity { .. }));

        assert!(repo.all().unwrap().is_empty());
    }
}

#[test]
fn unpersisted_update_and_delete_never_reach_the_adapter() {
    let spy = SpyAdapter::new(true);
    let repo = books(Arc::new(spy.clone()));

    let update = repo.update(Book::titled("draft")).unwrap_err();
    assert!(matches!(update, RepoError::NonPersistedEntity { .. }));
    let delete = repo.delete(Book::titled("draft")).unwrap_err();
    assert!(matches!(delete, RepoError::NonPersistedEntity { .. }));
    assert_eq!(spy.calls(), 0);

    // The rejected writes did not read the clock either.
    let created = repo.create(Book::titled("first")).unwrap().unwrap();
    assert_eq!(created.timestamps.created_at, Some(start()));
    assert_eq!(spy.calls(), 1);
}

#[test]
fn delete_removes_only_that_entity() {
    for adapter in adapters() {
        let repo = books(adapter);
        let a = repo.create(Book::titled("A")).unwrap().unwrap();
        let b = repo.create(Book::titled("B")).unwrap().unwrap();

        let deleted = repo.delete(a.clone()).unwrap();
        assert_eq!(deleted, a);
        assert_eq!(repo.find(1).unwrap(), None);
        assert_eq!(repo.all().unwrap(), vec![b]);

        let again = repo.delete(a).unwrap_err();
        assert!(matches!(again, RepoError::NotFound { id: 1, .. }));
    }
}

#[test]
fn persist_creates_then_updates() {
    for adapter in adapters() {
        let repo = books(adapter);

        let mut saved = repo.persist(Book::titled("A")).unwrap();
        assert_eq!(saved.id, Some(1));

        saved.title = "B".to_string();
        let saved = repo.persist(saved).unwrap();
        assert_eq!(saved.id, Some(1));
        assert_eq!(repo.all().unwrap().len(), 1);
        assert_eq!(repo.first().unwrap().unwrap().title, "B");
    }
}

#[test]
fn first_and_last_follow_id_order() {
    for adapter in adapters() {
        let repo = books(adapter);
        assert_eq!(repo.first().unwrap(), None);
        assert_eq!(repo.last().unwrap(), None);

        for title in ["A", "B", "C"] {
            repo.create(Book::titled(title)).unwrap();
        }
        assert_eq!(repo.first().unwrap().unwrap().title, "A");
        assert_eq!(repo.last().unwrap().unwrap().title, "C");
    }
}

#[test]
fn clear_empties_collection_and_ids_are_not_reused() {
    for adapter in adapters() {
        let repo = books(adapter);
        repo.create(Book::titled("A")).unwrap();
        repo.create(Book::titled("B")).unwrap();

        repo.clear().unwrap();
        assert!(repo.all().unwrap().is_empty());

        let next = repo.create(Book::titled("C")).unwrap().unwrap();
        assert_eq!(next.id, Some(3), "adapter={}", repo.adapter_name());
    }
}

#[test]
fn collections_are_isolated_on_one_adapter() {
    for adapter in adapters() {
        let books_repo = books(Arc::clone(&adapter));
        let archive = Repository::<Book>::with_collection(adapter, "archived_books");

        books_repo.create(Book::titled("A")).unwrap();
        archive.create(Book::titled("Z")).unwrap();

        assert_eq!(books_repo.all().unwrap().len(), 1);
        assert_eq!(archive.all().unwrap()[0].title, "Z");
        assert_eq!(archive.all().unwrap()[0].id, Some(1));
    }
}

#[test]
fn invalid_collection_name_is_rejected_before_storage() {
    for adapter in adapters() {
        let repo = Repository::<Book>::with_collection(adapter, "books; DROP TABLE x");
        let err = repo.create(Book::titled("A")).unwrap_err();
        assert!(matches!(err, RepoError::InvalidCollection(_)));
    }
}

#[test]
fn rebinding_adapter_leaves_existing_clones_untouched() {
    let first = Arc::new(MemoryAdapter::new());
    let second = Arc::new(MemoryAdapter::new());

    let original = Repository::<Book>::new(first);
    let rebound = original.clone().with_adapter(second);

    original.create(Book::titled("on first")).unwrap();
    rebound.create(Book::titled("on second")).unwrap();
    rebound.create(Book::titled("also second")).unwrap();

    assert_eq!(original.all().unwrap().len(), 1);
    assert_eq!(rebound.all().unwrap().len(), 2);
}

#[test]
fn sqlite_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stowage.db");

    {
        let repo = books(Arc::new(SqliteAdapter::open(&path).unwrap()));
        repo.create(Book::titled("kept")).unwrap();
    }

    let reopened = SqliteAdapter::open(&path).unwrap();
    assert_eq!(reopened.collections().unwrap(), vec!["books"]);
    let repo = books(Arc::new(reopened));
    assert_eq!(repo.all().unwrap()[0].title, "kept");
}
