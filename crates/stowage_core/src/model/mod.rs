//! Entity and record shapes shared by repositories and adapters.
//!
//! # Responsibility
//! - Define the entity capability contract consumed by repositories.
//! - Define the type-erased record that adapters store and return.
//!
//! # Invariants
//! - Identity is `Option<EntityId>`; `Some` means persisted.
//! - Adapters never see typed entities, only `Record`s.

pub mod entity;
pub mod record;
