//! Repository layer: the facade application code talks to.
//!
//! # Responsibility
//! - Expose a uniform persistence API over any `Adapter`.
//! - Enforce identity and timestamp invariants independent of backend.
//!
//! # Invariants
//! - Persisted means `id().is_some()`.
//! - `created_at` is written once; `updated_at` on every write.
//! - A repository built with `Repository::default()` fails every delegated
//!   operation with `UnsupportedOperation`.

pub mod clock;
pub mod definition;
pub mod repository;
