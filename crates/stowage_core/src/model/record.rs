//! Type-erased storage shape exchanged between repositories and adapters.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Entity, EntityId};
use serde_json::{Map, Value};

/// A backend row returned by `fetch`, bypassing entity mapping.
pub type RawRow = Map<String, Value>;

const ID_FIELD: &str = "id";

/// Entity attributes keyed by field name, with identity held apart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub id: Option<EntityId>,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: Option<EntityId>, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Serializes an entity into a record.
    ///
    /// # Errors
    /// - `Serialization` when serde fails.
    /// - `InvalidData` when the entity does not serialize to a JSON object.
    pub fn from_entity<E: Entity>(entity: &E) -> RepoResult<Self> {
        match serde_json::to_value(entity)? {
            Value::Object(mut fields) => {
                fields.remove(ID_FIELD);
                Ok(Self::new(entity.id(), fields))
            }
            other => Err(RepoError::InvalidData(format!(
                "entity must serialize to an object, got `{}`",
                json_kind(&other)
            ))),
        }
    }

    /// Rebuilds a typed entity, re-attaching identity.
    pub fn into_entity<E: Entity>(self) -> RepoResult<E> {
        let Record { id, mut fields } = self;
        fields.insert(ID_FIELD.to_string(), id.map_or(Value::Null, Value::from));
        let mut entity: E = serde_json::from_value(Value::Object(fields))?;
        if let Some(id) = id {
            entity.set_id(id);
        }
        Ok(entity)
    }

    /// Looks up a dotted field path; `id` resolves to the identity.
    pub fn get(&self, path: &str) -> Option<Value> {
        if path == ID_FIELD {
            return self.id.map(Value::from);
        }

        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    /// Full document including `id`, as handed to raw-row consumers.
    pub fn into_row(self) -> RawRow {
        let mut row = RawRow::new();
        row.insert(ID_FIELD.to_string(), self.id.map_or(Value::Null, Value::from));
        row.extend(self.fields);
        row
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
