//! Error taxonomy shared by repositories, adapters and queries.
//!
//! # Responsibility
//! - Give every failure mode of the mediation layer a distinguishable variant.
//! - Keep backend transport errors wrapped, never flattened into strings.
//!
//! # Invariants
//! - Nothing in this crate retries; every error is surfaced to the caller.
//! - `create` on a persisted entity is not an error (it returns `Ok(None)`).

use crate::db::DbError;
use crate::model::entity::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository/adapter error.
#[derive(Debug)]
pub enum RepoError {
    /// `update`/`delete` called on an entity without identity.
    NonPersistedEntity { collection: String },
    /// The adapter does not implement the requested capability.
    UnsupportedOperation {
        adapter: &'static str,
        operation: &'static str,
    },
    /// A raw statement passed to `execute` was rejected by the backend.
    InvalidCommand { statement: String, message: String },
    /// A raw statement passed to `fetch`, or a query plan, was rejected.
    InvalidQuery { statement: String, message: String },
    NotFound { collection: String, id: EntityId },
    InvalidCollection(String),
    Db(DbError),
    Serialization(serde_json::Error),
    InvalidData(String),
    LockPoisoned(&'static str),
}

impl RepoError {
    pub(crate) fn unsupported(adapter: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation { adapter, operation }
    }

    pub(crate) fn invalid_query(statement: impl Into<String>, message: impl Display) -> Self {
        Self::InvalidQuery {
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// Stable short code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonPersistedEntity { .. } => "non_persisted_entity",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::InvalidCommand { .. } => "invalid_command",
            Self::InvalidQuery { .. } => "invalid_query",
            Self::NotFound { .. } => "not_found",
            Self::InvalidCollection(_) => "invalid_collection",
            Self::Db(_) => "db_error",
            Self::Serialization(_) => "serialization_error",
            Self::InvalidData(_) => "invalid_data",
            Self::LockPoisoned(_) => "lock_poisoned",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPersistedEntity { collection } => {
                write!(f, "entity in `{collection}` is not persisted (missing id)")
            }
            Self::UnsupportedOperation { adapter, operation } => write!(
                f,
                "operation `{operation}` is not supported by the `{adapter}` adapter"
            ),
            Self::InvalidCommand { statement, message } => {
                write!(f, "invalid command `{statement}`: {message}")
            }
            Self::InvalidQuery { statement, message } => {
                write!(f, "invalid query `{statement}`: {message}")
            }
            Self::NotFound { collection, id } => {
                write!(f, "record not found: {collection}#{id}")
            }
            Self::InvalidCollection(name) => write!(f, "invalid collection name `{name}`"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "entity serialization failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::LockPoisoned(what) => write!(f, "{what} lock poisoned"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;

    #[test]
    fn unsupported_operation_names_adapter_and_operation() {
        let err = RepoError::unsupported("null", "create");
        let message = err.to_string();
        assert!(message.contains("`create`"));
        assert!(message.contains("`null`"));
        assert_eq!(err.code(), "unsupported_operation");
    }

    #[test]
    fn sqlite_errors_convert_into_db_variant() {
        let err: RepoError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, RepoError::Db(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
