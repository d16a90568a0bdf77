use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::schema::{EntityField, FieldType};

#[derive(Debug, Error)]
pub enum DialectError {
    #[error("sqlite does not support changing a column type")]
    AlterUnsupported,
    #[error("unknown database backend `{0}`")]
    UnknownBackend(String),
}

/// Database backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl FromStr for Dialect {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Dialect::Sqlite),
            "psql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(DialectError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "psql"),
            Dialect::MySql => write!(f, "mysql"),
        }
    }
}

impl Dialect {
    /// Column type a field projects to in DDL.
    ///
    /// Dates are stored as RFC 3339 TEXT on every backend. Postgres has no
    /// unsigned integer types, so the unsigned kinds widen to the next
    /// signed type and `bool` lands in SMALLINT. MySQL string keys use
    /// VARCHAR because TEXT columns cannot be primary keys there.
    pub fn column_type(&self, kind: FieldType) -> &'static str {
        use FieldType::*;
        match self {
            Dialect::Sqlite => match kind {
                Xml | String | Date | Json | File | Files => "TEXT",
                Double => "REAL",
                Int8 | Uint8 | Int16 | Uint16 | Int32 | Uint32 | Int64 | Uint64 | Bool => "INTEGER",
                Blob => "BLOB",
            },
            Dialect::Postgres => match kind {
                Xml | String | Date | Json | File | Files => "TEXT",
                Double => "DOUBLE PRECISION",
                Int8 | Uint8 | Int16 => "SMALLINT",
                Uint16 | Int32 => "INTEGER",
                Uint32 | Int64 | Uint64 => "BIGINT",
                Bool => "SMALLINT",
                Blob => "BYTEA",
            },
            Dialect::MySql => match kind {
                String | Date | File => "VARCHAR(255)",
                Xml | Json | Files => "TEXT",
                Double => "DOUBLE",
                Int8 => "TINYINT",
                Uint8 => "TINYINT UNSIGNED",
                Int16 => "SMALLINT",
                Uint16 => "SMALLINT UNSIGNED",
                Int32 => "INT",
                Uint32 => "INT UNSIGNED",
                Int64 => "BIGINT",
                Uint64 => "BIGINT UNSIGNED",
                Bool => "TINYINT",
                Blob => "BLOB",
            },
        }
    }

    /// Positional parameter marker, 1-based.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            _ => "?".to_string(),
        }
    }

    pub fn column_def(&self, field: &EntityField) -> String {
        let mut def = format!("{} {}", field.name, self.column_type(field.field_type));
        if field.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        if field.required && !field.primary_key {
            def.push_str(" NOT NULL");
        }
        if field.unique && !field.primary_key {
            def.push_str(" UNIQUE");
        }
        if let Some(default) = field.constraints.default_value.as_ref() {
            let literal = match default {
                serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
                other => other.to_string(),
            };
            def.push_str(&format!(" DEFAULT {literal}"));
        }
        def
    }

    /// ADD COLUMN definition. UNIQUE is left out here: SQLite refuses it
    /// inline on ALTER, so uniqueness on added columns goes through
    /// [`Dialect::constraint_unique`] where the backend supports it.
    pub fn add_column(&self, table: &str, field: &EntityField) -> String {
        let mut def = format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            field.name,
            self.column_type(field.field_type)
        );
        if let Some(default) = field.constraints.default_value.as_ref() {
            let literal = match default {
                serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
                other => other.to_string(),
            };
            def.push_str(&format!(" DEFAULT {literal}"));
        }
        def
    }

    pub fn drop_column(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} DROP COLUMN {column}")
    }

    pub fn rename_column(&self, table: &str, old: &str, new: &str) -> String {
        format!("ALTER TABLE {table} RENAME COLUMN {old} TO {new}")
    }

    /// Column type change. SQLite has no such ALTER, which the caller
    /// surfaces as an invalid-argument error.
    pub fn alter_column(&self, table: &str, column: &str, kind: FieldType) -> Result<String, DialectError> {
        match self {
            Dialect::Sqlite => Err(DialectError::AlterUnsupported),
            Dialect::Postgres => Ok(format!(
                "ALTER TABLE {table} ALTER COLUMN {column} TYPE {}",
                self.column_type(kind)
            )),
            Dialect::MySql => Ok(format!(
                "ALTER TABLE {table} MODIFY COLUMN {column} {}",
                self.column_type(kind)
            )),
        }
    }

    pub fn rename_table(&self, old: &str, new: &str) -> String {
        match self {
            Dialect::MySql => format!("RENAME TABLE {old} TO {new}"),
            _ => format!("ALTER TABLE {old} RENAME TO {new}"),
        }
    }

    pub fn constraint_unique(&self, name: &str, column: &str) -> String {
        format!("CONSTRAINT {name} UNIQUE ({column})")
    }
}
