use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::schema::{EntitySchema, FieldType};

#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[^\s]+$").expect("valid url regex"))
}

/// Checks a value against a named preset (`@email`, `@password`, `@url`).
pub fn check_preset(preset: &str, field: &str, value: &str) -> Result<(), ValidationError> {
    match preset {
        "@email" => {
            if email_re().is_match(value) {
                Ok(())
            } else {
                Err(ValidationError(format!("{field} is not a valid email address")))
            }
        }
        // At least eight characters mixing letters and digits. The regex
        // crate has no lookahead, so the parts are checked directly.
        "@password" => {
            let has_alpha = value.chars().any(|c| c.is_ascii_alphabetic());
            let has_digit = value.chars().any(|c| c.is_ascii_digit());
            if value.len() >= 8 && has_alpha && has_digit {
                Ok(())
            } else {
                Err(ValidationError(format!(
                    "{field} should be at least 8 chars long with letters and digits"
                )))
            }
        }
        "@url" => {
            if url_re().is_match(value) {
                Ok(())
            } else {
                Err(ValidationError(format!("{field} is not a valid URL")))
            }
        }
        other => Err(ValidationError(format!("unknown validator `{other}` on {field}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

/// Validates a request body against the schema: required-ness (on create),
/// min/max constraints and validator presets. Unknown body keys are left
/// alone; the executor drops them.
pub fn validate(
    schema: &EntitySchema,
    body: &Value,
    mode: ValidationMode,
) -> Result<(), ValidationError> {
    for field in &schema.fields {
        let name = field.name.as_str();
        if matches!(name, "id" | "created" | "updated") {
            continue;
        }

        let value = body.get(name);
        let missing = match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            _ => false,
        };

        if missing {
            if field.required && mode == ValidationMode::Create {
                return Err(ValidationError(format!("{name} is required")));
            }
            continue;
        }
        let value = value.expect("present");

        if let Some(min) = field.constraints.min_value {
            match (field.field_type, value) {
                (FieldType::String | FieldType::Xml, Value::String(s)) => {
                    if (s.chars().count() as f64) < min {
                        return Err(ValidationError(format!(
                            "{name} should be at least {} chars long",
                            min as i64
                        )));
                    }
                }
                (t, Value::Number(n)) if t.is_numeric() => {
                    if n.as_f64().unwrap_or(f64::MIN) < min {
                        return Err(ValidationError(format!(
                            "{name} should be at least {}",
                            min as i64
                        )));
                    }
                }
                _ => {}
            }
        }

        if let Some(max) = field.constraints.max_value {
            match (field.field_type, value) {
                (FieldType::String | FieldType::Xml, Value::String(s)) => {
                    if (s.chars().count() as f64) > max {
                        return Err(ValidationError(format!(
                            "{name} should be at most {} chars long",
                            max as i64
                        )));
                    }
                }
                (t, Value::Number(n)) if t.is_numeric() => {
                    if n.as_f64().unwrap_or(f64::MAX) > max {
                        return Err(ValidationError(format!(
                            "{name} should be at most {}",
                            max as i64
                        )));
                    }
                }
                _ => {}
            }
        }

        if field.field_type.is_numeric() && !value.is_number() {
            if let Value::String(s) = value {
                if s.parse::<f64>().is_err() {
                    return Err(ValidationError(format!("{name} should be a number")));
                }
            } else {
                return Err(ValidationError(format!("{name} should be a number")));
            }
        }

        if let (Some(preset), Value::String(s)) = (field.constraints.validator.as_deref(), value) {
            check_preset(preset, name, s)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityField, EntitySchema, FieldType};
    use serde_json::json;

    fn posts_schema() -> EntitySchema {
        let mut schema = EntitySchema::new_base("posts");
        let mut title = EntityField::user("title", FieldType::String);
        title.required = true;
        title.constraints.min_value = Some(3.0);
        schema.fields.push(title);
        schema
    }

    #[test]
    fn short_string_fails_min_value() {
        let err = validate(&posts_schema(), &json!({"title": "hi"}), ValidationMode::Create)
            .unwrap_err();
        assert_eq!(err.0, "title should be at least 3 chars long");
    }

    #[test]
    fn long_enough_string_passes() {
        assert!(validate(&posts_schema(), &json!({"title": "hey"}), ValidationMode::Create).is_ok());
    }

    #[test]
    fn required_field_missing_on_create() {
        let err = validate(&posts_schema(), &json!({}), ValidationMode::Create).unwrap_err();
        assert_eq!(err.0, "title is required");
    }

    #[test]
    fn required_field_may_be_absent_on_update() {
        assert!(validate(&posts_schema(), &json!({}), ValidationMode::Update).is_ok());
    }

    #[test]
    fn email_preset() {
        assert!(check_preset("@email", "email", "a@b.c").is_ok());
        assert!(check_preset("@email", "email", "not-an-email").is_err());
    }

    #[test]
    fn password_preset_needs_letters_and_digits() {
        assert!(check_preset("@password", "password", "Abcdef12").is_ok());
        assert!(check_preset("@password", "password", "secret12").is_ok());
        assert!(check_preset("@password", "password", "short1").is_err());
        assert!(check_preset("@password", "password", "onlyletters").is_err());
        assert!(check_preset("@password", "password", "12345678").is_err());
    }

    #[test]
    fn auth_schema_enforces_email_preset() {
        let schema = EntitySchema::new_auth("users");
        let err = validate(
            &schema,
            &json!({"email": "nope", "password": "secret12"}),
            ValidationMode::Create,
        )
        .unwrap_err();
        assert_eq!(err.0, "email is not a valid email address");
    }

    #[test]
    fn numeric_range() {
        let mut schema = EntitySchema::new_base("items");
        let mut qty = EntityField::user("qty", FieldType::Int32);
        qty.constraints.min_value = Some(1.0);
        qty.constraints.max_value = Some(10.0);
        schema.fields.push(qty);
        assert!(validate(&schema, &json!({"qty": 5}), ValidationMode::Create).is_ok());
        let err = validate(&schema, &json!({"qty": 0}), ValidationMode::Create).unwrap_err();
        assert_eq!(err.0, "qty should be at least 1");
        let err = validate(&schema, &json!({"qty": 11}), ValidationMode::Create).unwrap_err();
        assert_eq!(err.0, "qty should be at most 10");
    }
}
