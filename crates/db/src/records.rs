use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Column, Row};

use crate::entity::EntityError;
use crate::schema::{EntitySchema, FieldType};

pub type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Binds one typed value onto a dynamic query. This is the parameter-binding
/// arm of the field-kind switch; DDL projection and row decoding are the
/// other two.
pub fn bind_field<'q>(
    query: AnyQuery<'q>,
    name: &str,
    kind: FieldType,
    value: &Value,
) -> Result<AnyQuery<'q>, EntityError> {
    use FieldType::*;
    let query = match kind {
        Xml | String | Date | File => match value {
            Value::Null => query.bind(Option::<std::string::String>::None),
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        },
        Json | Files => match value {
            Value::Null => query.bind(Option::<std::string::String>::None),
            other => query.bind(serde_json::to_string(other).map_err(|e| {
                EntityError::InvalidArgument(format!("field `{name}` is not valid json: {e}"))
            })?),
        },
        Int8 | Uint8 | Int16 | Uint16 | Int32 | Uint32 | Int64 | Uint64 => match value {
            Value::Null => query.bind(Option::<i64>::None),
            Value::Number(n) if n.as_i64().is_some() => query.bind(n.as_i64().unwrap_or_default()),
            Value::String(s) if s.parse::<i64>().is_ok() => {
                query.bind(s.parse::<i64>().unwrap_or_default())
            }
            _ => {
                return Err(EntityError::InvalidArgument(format!(
                    "field `{name}` should be an integer"
                )));
            }
        },
        Double => match value {
            Value::Null => query.bind(Option::<f64>::None),
            Value::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
            Value::String(s) if s.parse::<f64>().is_ok() => {
                query.bind(s.parse::<f64>().unwrap_or_default())
            }
            _ => {
                return Err(EntityError::InvalidArgument(format!(
                    "field `{name}` should be a number"
                )));
            }
        },
        Bool => match value {
            Value::Null => query.bind(Option::<i64>::None),
            Value::Bool(b) => query.bind(i64::from(*b)),
            Value::Number(n) => query.bind(i64::from(n.as_i64().unwrap_or_default() != 0)),
            _ => {
                return Err(EntityError::InvalidArgument(format!(
                    "field `{name}` should be a boolean"
                )));
            }
        },
        Blob => match value {
            Value::Null => query.bind(Option::<Vec<u8>>::None),
            Value::String(s) => query.bind(BASE64.decode(s).map_err(|_| {
                EntityError::InvalidArgument(format!("field `{name}` should be base64 data"))
            })?),
            _ => {
                return Err(EntityError::InvalidArgument(format!(
                    "field `{name}` should be base64 data"
                )));
            }
        },
    };
    Ok(query)
}

/// Decodes one schema-known column out of a row into its JSON shape.
fn decode_field(row: &AnyRow, name: &str, kind: FieldType) -> Value {
    use FieldType::*;
    match kind {
        Xml | String | Date | File => row
            .try_get::<Option<std::string::String>, _>(name)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Json | Files => row
            .try_get::<Option<std::string::String>, _>(name)
            .ok()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
            .unwrap_or(Value::Null),
        Int8 | Uint8 | Int16 | Uint16 | Int32 | Uint32 | Int64 | Uint64 => row
            .try_get::<Option<i64>, _>(name)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        Double => row
            .try_get::<Option<f64>, _>(name)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        Bool => row
            .try_get::<Option<i64>, _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Bool(v != 0))
            .unwrap_or(Value::Null),
        Blob => row
            .try_get::<Option<Vec<u8>>, _>(name)
            .ok()
            .flatten()
            .map(|bytes| Value::String(BASE64.encode(bytes)))
            .unwrap_or(Value::Null),
    }
}

/// Projects a row onto the schema's fields. Columns the schema does not
/// know about are dropped.
pub fn record_from_row(schema: &EntitySchema, row: &AnyRow) -> Value {
    let mut record = Map::new();
    for field in &schema.fields {
        record.insert(field.name.clone(), decode_field(row, &field.name, field.field_type));
    }
    Value::Object(record)
}

/// Column-driven decode for view entities, where no field list exists.
/// Each column is tried as integer, float, text, then bytes.
pub fn dynamic_record(row: &AnyRow) -> Value {
    let mut record = Map::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v.map(Value::String).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            v.map(|b| Value::String(BASE64.encode(b))).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        record.insert(column.name().to_string(), value);
    }
    Value::Object(record)
}

/// Erases the password key in place. Applied to every auth-entity record
/// before it leaves the CRUD executor.
pub fn redact_password(record: &mut Value) {
    if let Value::Object(map) = record {
        map.remove("password");
    }
}

/// Coerces raw multipart text into the JSON shape a field expects.
pub fn coerce_text(kind: FieldType, raw: &str) -> Value {
    use FieldType::*;
    match kind {
        Json | Files => serde_json::from_str(raw).unwrap_or(Value::String(raw.to_string())),
        Bool => match raw {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        Int8 | Uint8 | Int16 | Uint16 | Int32 | Uint32 | Int64 | Uint64 => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw.to_string())),
        Double => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_text_by_kind() {
        assert_eq!(coerce_text(FieldType::Int32, "42"), Value::from(42));
        assert_eq!(coerce_text(FieldType::Bool, "true"), Value::Bool(true));
        assert_eq!(coerce_text(FieldType::Double, "2.5"), Value::from(2.5));
        assert_eq!(
            coerce_text(FieldType::Files, r#"["a.png","b.png"]"#),
            serde_json::json!(["a.png", "b.png"])
        );
        assert_eq!(coerce_text(FieldType::String, "42"), Value::String("42".into()));
    }

    #[test]
    fn redact_removes_password_only() {
        let mut record = serde_json::json!({"id": "x", "password": "secret", "email": "a@b.c"});
        redact_password(&mut record);
        assert!(record.get("password").is_none());
        assert_eq!(record.get("email").unwrap(), "a@b.c");
    }
}
