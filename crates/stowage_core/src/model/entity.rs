//! Entity capability contract.
//!
//! # Responsibility
//! - Describe what a domain value must expose to be mediated by a repository.
//! - Declare timestamp support statically instead of probing fields at runtime.
//!
//! # Invariants
//! - An entity is persisted iff `id()` is `Some`.
//! - Entities serialize to a JSON object; the identity lives under `id`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Storage identity assigned by adapters on create.
pub type EntityId = i64;

/// Optional write timestamps.
///
/// Usually embedded with `#[serde(flatten)]` so the stored document keeps
/// `created_at`/`updated_at` as top-level keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    /// Applies write policy: `created_at` only when absent, `updated_at` always.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// A domain value with identity, mediated (not owned) by a repository.
///
/// Types that carry write timestamps override both `timestamps` hooks; types
/// that don't keep the defaults and are never touched.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: EntityId);

    fn timestamps(&self) -> Option<&Timestamps> {
        None
    }

    fn timestamps_mut(&mut self) -> Option<&mut Timestamps> {
        None
    }

    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}
