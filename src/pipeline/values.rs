//! Plain value projection of a result set.

use serde::Serialize;
use serde_json::Value;

use crate::error::{LiveQueryError, LiveResult};
use crate::snapshot::DocumentSnapshot;

/// Serializes each document in order.
///
/// When `id_field` is set, the document id is written into that field of each
/// value, replacing any existing field with the same name. Documents that do
/// not serialize to a JSON object cannot carry an id field.
pub fn project_values<'a, T, I>(documents: I, id_field: Option<&str>) -> LiveResult<Vec<Value>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a DocumentSnapshot<T>>,
{
    documents
        .into_iter()
        .map(|doc| project_one(doc, id_field))
        .collect()
}

fn project_one<T: Serialize>(doc: &DocumentSnapshot<T>, id_field: Option<&str>) -> LiveResult<Value> {
    let mut value =
        serde_json::to_value(&doc.data).map_err(|e| LiveQueryError::serialization(format!("document {}: {e}", doc.id)))?;

    if let Some(field) = id_field {
        match &mut value {
            Value::Object(map) => {
                map.insert(field.to_string(), Value::String(doc.id.clone()));
            }
            other => {
                return Err(LiveQueryError::serialization(format!(
                    "document {} is not an object; cannot set id field `{field}` on {}",
                    doc.id,
                    json_kind(other)
                )));
            }
        }
    }
    Ok(value)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
