use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::dialect::Dialect;

pub const ADMINS_TABLE: &str = "_admins";
pub const TABLES_TABLE: &str = "_tables";
pub const SETTINGS_TABLE: &str = "_settings";

/// Value kinds a field can hold. The narrow switch over this enum lives in
/// three places only: DDL projection ([`Dialect::column_type`]), parameter
/// binding and row decoding ([`crate::records`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Xml,
    String,
    Double,
    Date,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Blob,
    Json,
    Bool,
    File,
    Files,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Int8
                | FieldType::Uint8
                | FieldType::Int16
                | FieldType::Uint16
                | FieldType::Int32
                | FieldType::Uint32
                | FieldType::Int64
                | FieldType::Uint64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self == FieldType::Double
    }

    pub fn is_file(self) -> bool {
        matches!(self, FieldType::File | FieldType::Files)
    }
}

/// Open constraint mapping; only these keys are recognized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub constraints: FieldConstraints,
}

impl EntityField {
    pub fn system(name: &str, field_type: FieldType, required: bool, primary_key: bool) -> Self {
        EntityField {
            name: name.to_string(),
            field_type,
            required,
            primary_key,
            system: true,
            unique: false,
            constraints: FieldConstraints::default(),
        }
    }

    pub fn user(name: &str, field_type: FieldType) -> Self {
        EntityField {
            name: name.to_string(),
            field_type,
            required: false,
            primary_key: false,
            system: false,
            unique: false,
            constraints: FieldConstraints::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Base,
    Auth,
    View,
}

/// Which CRUD operation a rule string guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    List,
    Get,
    Add,
    Update,
    Delete,
}

/// Declarative table metadata. Projects to DDL per dialect and to the JSON
/// stored in the `_tables.schema` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub system: bool,
    #[serde(default = "default_true")]
    pub has_api: bool,
    pub fields: Vec<EntityField>,
    #[serde(default)]
    pub list_rule: String,
    #[serde(default)]
    pub get_rule: String,
    #[serde(default)]
    pub add_rule: String,
    #[serde(default)]
    pub update_rule: String,
    #[serde(default)]
    pub delete_rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_query: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Stable identifier for an entity name: `mt_` plus the first eight bytes
/// of its sha256, hex encoded. Recomputed on rename.
pub fn schema_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("mt_{hex}")
}

pub fn base_fields() -> Vec<EntityField> {
    vec![
        EntityField::system("id", FieldType::String, true, true),
        EntityField::system("created", FieldType::Date, true, false),
        EntityField::system("updated", FieldType::Date, true, false),
    ]
}

pub fn auth_fields() -> Vec<EntityField> {
    let mut fields = base_fields();
    fields.push(EntityField::user("name", FieldType::String));
    let mut email = EntityField::system("email", FieldType::String, true, false);
    email.unique = true;
    email.constraints.validator = Some("@email".to_string());
    fields.push(email);
    let mut password = EntityField::system("password", FieldType::String, true, false);
    password.constraints.validator = Some("@password".to_string());
    fields.push(password);
    fields
}

impl EntitySchema {
    pub fn new_base(name: &str) -> Self {
        EntitySchema {
            id: schema_id(name),
            name: name.to_string(),
            entity_type: EntityType::Base,
            system: false,
            has_api: true,
            fields: base_fields(),
            list_rule: String::new(),
            get_rule: String::new(),
            add_rule: String::new(),
            update_rule: String::new(),
            delete_rule: String::new(),
            view_query: None,
        }
    }

    pub fn new_auth(name: &str) -> Self {
        let mut schema = Self::new_base(name);
        schema.entity_type = EntityType::Auth;
        schema.fields = auth_fields();
        schema
    }

    pub fn new_view(name: &str, query: &str) -> Self {
        let mut schema = Self::new_base(name);
        schema.entity_type = EntityType::View;
        schema.fields = Vec::new();
        schema.view_query = Some(query.to_string());
        schema
    }

    /// The `_admins` auth entity. Carries no `name` column.
    pub fn admins() -> Self {
        let mut schema = Self::new_auth(ADMINS_TABLE);
        schema.system = true;
        schema.fields.retain(|f| f.name != "name");
        schema
    }

    /// The `_tables` metadata entity holding every schema as a row.
    pub fn tables() -> Self {
        let mut schema = Self::new_base(TABLES_TABLE);
        schema.system = true;
        let mut name = EntityField::system("name", FieldType::String, true, false);
        name.unique = true;
        schema.fields.push(name);
        schema
            .fields
            .push(EntityField::system("type", FieldType::String, true, false));
        schema
            .fields
            .push(EntityField::system("schema", FieldType::Json, true, false));
        schema
            .fields
            .push(EntityField::system("has_api", FieldType::Bool, false, false));
        schema
    }

    /// The `_settings` singleton entity.
    pub fn settings() -> Self {
        let mut schema = Self::new_base(SETTINGS_TABLE);
        schema.system = true;
        schema
            .fields
            .push(EntityField::system("value", FieldType::Json, true, false));
        schema
    }

    pub fn field(&self, name: &str) -> Option<&EntityField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn file_fields(&self) -> impl Iterator<Item = &EntityField> {
        self.fields.iter().filter(|f| f.field_type.is_file())
    }

    pub fn is_auth(&self) -> bool {
        self.entity_type == EntityType::Auth
    }

    pub fn is_view(&self) -> bool {
        self.entity_type == EntityType::View
    }

    pub fn rule_for(&self, op: RuleOp) -> &str {
        match op {
            RuleOp::List => &self.list_rule,
            RuleOp::Get => &self.get_rule,
            RuleOp::Add => &self.add_rule,
            RuleOp::Update => &self.update_rule,
            RuleOp::Delete => &self.delete_rule,
        }
    }

    /// CREATE TABLE / CREATE VIEW statement for this schema.
    pub fn create_ddl(&self, dialect: Dialect) -> String {
        if let Some(query) = self.view_query.as_deref() {
            return format!("CREATE VIEW {} AS {}", self.name, query);
        }
        let columns: Vec<String> = self.fields.iter().map(|f| dialect.column_def(f)).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            columns.join(", ")
        )
    }

    pub fn drop_ddl(&self) -> String {
        if self.is_view() {
            format!("DROP VIEW IF EXISTS {}", self.name)
        } else {
            format!("DROP TABLE IF EXISTS {}", self.name)
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("schema serializes")
    }

    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// File names a record references through this schema's file fields.
    pub fn files_in_record(&self, record: &Value) -> Vec<String> {
        let mut names = Vec::new();
        for field in self.file_fields() {
            match record.get(&field.name) {
                Some(Value::String(s)) if !s.is_empty() => names.push(s.clone()),
                Some(Value::Array(items)) => {
                    names.extend(items.iter().filter_map(|v| v.as_str()).map(String::from));
                }
                _ => {}
            }
        }
        names
    }
}
