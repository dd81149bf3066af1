//! Document types for the live collection.

use crate::{error::Result, DocId, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the identity field in a document's JSON form.
pub const ID_FIELD: &str = "_id";

/// Field mapping of a document, without its identity.
pub type Fields = serde_json::Map<String, Value>;

/// A document in the live collection.
///
/// In JSON form the id sits next to the fields under `_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier, the durable store key
    #[serde(rename = "_id")]
    pub id: DocId,
    /// Arbitrary document fields
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    /// Create a document from an id and its fields.
    ///
    /// A stray `_id` entry in `fields` is dropped; the explicit id wins.
    pub fn new(id: impl Into<DocId>, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from a JSON object.
    ///
    /// Uses `_id` when present (it must be a string), otherwise generates a
    /// fresh random id.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidDocument(format!(
                    "expected object, got {}",
                    json_type(&other)
                )))
            }
        };

        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(Error::InvalidDocument(format!(
                    "_id must be a string, got {}",
                    json_type(&other)
                )))
            }
            None => generate_id(),
        };

        Ok(Self { id, fields })
    }

    /// Convert into the JSON form with `_id` attached.
    pub fn into_value(self) -> Value {
        let mut map = self.fields;
        map.insert(ID_FIELD.to_string(), Value::String(self.id));
        Value::Object(map)
    }

    /// Split the document into its store key and its durable field mapping.
    pub fn into_parts(self) -> (DocId, Fields) {
        (self.id, self.fields)
    }

    /// Look up a field by dotted path. `_id` resolves to the document id.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if path == ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

/// Generate a fresh document id.
pub fn generate_id() -> DocId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A single id, a list of ids, or every id.
///
/// Replaces loosely typed id arguments: the variant is decided where the
/// argument enters the API, so a malformed argument never reaches storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSelector<T = DocId> {
    One(T),
    Many(Vec<T>),
    All,
}

impl<T> IdSelector<T> {
    /// Ids named by this selector, or `None` for [`IdSelector::All`].
    pub fn into_ids(self) -> Option<Vec<T>> {
        match self {
            IdSelector::One(id) => Some(vec![id]),
            IdSelector::Many(ids) => Some(ids),
            IdSelector::All => None,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, IdSelector::All)
    }
}

impl From<&str> for IdSelector<DocId> {
    fn from(id: &str) -> Self {
        IdSelector::One(id.to_string())
    }
}

impl From<String> for IdSelector<DocId> {
    fn from(id: String) -> Self {
        IdSelector::One(id)
    }
}

impl From<Vec<String>> for IdSelector<DocId> {
    fn from(ids: Vec<String>) -> Self {
        IdSelector::Many(ids)
    }
}

impl From<Vec<&str>> for IdSelector<DocId> {
    fn from(ids: Vec<&str>) -> Self {
        IdSelector::Many(ids.into_iter().map(str::to_string).collect())
    }
}

impl TryFrom<&Value> for IdSelector<DocId> {
    type Error = Error;

    /// Resolve a dynamic id argument: string, array of strings, or null.
    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(IdSelector::All),
            Value::String(id) => Ok(IdSelector::One(id.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(id) => Ok(id.clone()),
                    other => Err(Error::InvalidArgument(format!(
                        "array entries must be strings, got {}",
                        json_type(other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(IdSelector::Many),
            other => Err(Error::InvalidArgument(format!(
                "expected string, array or null, got {}",
                json_type(other)
            ))),
        }
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
