use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use db::entity::{Entity, EntityError, ListOptions};
use db::schema::{EntityField, EntitySchema, EntityType, schema_id};
use db::{DbService, Dialect};
use serde_json::{Value, json};
use thiserror::Error;
use utils::text::is_valid_identifier;

use crate::files::FileService;
use crate::registry::EntityRegistry;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Conflict(String),
    #[error("entity not found")]
    NotFound,
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Runtime schema mutations: each operation wraps DDL, the `_tables` row,
/// the registry swap and the upload-directory maintenance behind one
/// mutation lock so concurrent requests never observe a half-applied
/// entity.
pub struct SchemaMutator {
    db: DbService,
    registry: Arc<EntityRegistry>,
    files: FileService,
}

impl SchemaMutator {
    pub fn new(db: DbService, registry: Arc<EntityRegistry>, files: FileService) -> Self {
        SchemaMutator { db, registry, files }
    }

    fn tables_entity(&self) -> Entity {
        self.db.entity(EntitySchema::tables())
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect
    }

    /// `_tables` row matched by id or name.
    pub async fn find_row(&self, id_or_name: &str) -> Result<Option<Value>, MutationError> {
        Ok(self
            .tables_entity()
            .query_from_cols(id_or_name, &["id", "name"])
            .await?)
    }

    /// Materializes every `_tables` row into the registry. Rows whose
    /// schema no longer parses are skipped with a warning instead of
    /// taking the boot down.
    pub async fn load_all(&self) -> Result<usize, MutationError> {
        let listing = self
            .tables_entity()
            .list(&ListOptions { page_index: 1, per_page: 100_000, count_pages: false })
            .await?;
        let mut loaded = 0;
        for row in &listing.records {
            match parse_schema_row(row) {
                Ok(schema) => {
                    self.registry.insert(self.db.entity(schema)).await;
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(row = %row["name"], %err, "skipping unparseable schema row");
                }
            }
        }
        Ok(loaded)
    }

    pub async fn create_entity(&self, draft: &Value) -> Result<EntitySchema, MutationError> {
        let _guard = self.registry.lock_mutations().await;

        let name = draft
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        validate_entity_name(&name)?;

        if self.registry.contains(&name).await || self.find_row(&name).await?.is_some() {
            return Err(MutationError::Conflict(format!("entity `{name}` already exists")));
        }

        let entity_type: EntityType = draft
            .get("type")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| MutationError::InvalidArgument("unknown entity type".to_string()))?
            .unwrap_or(EntityType::Base);

        let mut schema = match entity_type {
            EntityType::Base => EntitySchema::new_base(&name),
            EntityType::Auth => EntitySchema::new_auth(&name),
            EntityType::View => {
                let query = draft
                    .get("view_query")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if query.is_empty() {
                    return Err(MutationError::InvalidArgument(
                        "view entities require a view_query".to_string(),
                    ));
                }
                EntitySchema::new_view(&name, query)
            }
        };

        if let Some(fields) = draft.get("fields").and_then(Value::as_array) {
            for raw in fields {
                let field = parse_user_field(raw)?;
                // Built-in fields may not be redefined by user input.
                if schema.has_field(&field.name) {
                    continue;
                }
                schema.fields.push(field);
            }
        }

        apply_rule_patch(&mut schema, draft);
        if let Some(has_api) = draft.get("has_api").and_then(Value::as_bool) {
            schema.has_api = has_api;
        }

        let ddl = schema.create_ddl(self.dialect());
        tracing::debug!(entity = %name, %ddl, "creating entity");
        sqlx::query(&ddl).execute(&self.db.pool).await?;

        let row = json!({
            "name": schema.name,
            "type": serde_json::to_value(schema.entity_type).expect("type serializes"),
            "schema": schema.to_json(),
            "has_api": schema.has_api,
        });
        if let Err(err) = self
            .tables_entity()
            .create_with_id(&schema.id, &row)
            .await
        {
            // Roll the DDL back so a failed metadata insert leaves nothing
            // behind.
            let _ = sqlx::query(&schema.drop_ddl()).execute(&self.db.pool).await;
            return Err(err.into());
        }

        if let Err(err) = self.files.ensure_dir(&schema.name).await {
            tracing::warn!(entity = %schema.name, %err, "could not create upload directory");
        }

        self.registry.insert(self.db.entity(schema.clone())).await;
        Ok(schema)
    }

    pub async fn update_entity(
        &self,
        id_or_name: &str,
        patch: &Value,
    ) -> Result<EntitySchema, MutationError> {
        let _guard = self.registry.lock_mutations().await;

        let row = self.find_row(id_or_name).await?.ok_or(MutationError::NotFound)?;
        let old_id = row
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut schema = parse_schema_row(&row)?;
        let old_name = schema.name.clone();

        if let Some(new_type) = patch.get("type").and_then(Value::as_str) {
            let current = serde_json::to_value(schema.entity_type).expect("type serializes");
            if current != new_type {
                return Err(MutationError::InvalidArgument(
                    "changing entity types is not supported".to_string(),
                ));
            }
        }

        // Every DDL statement is collected first, then applied together
        // with the `_tables` row update in one transaction. A failure at
        // any step rolls the whole mutation back.
        let mut ddl = Vec::new();
        self.collect_field_drops(&mut schema, patch, &mut ddl)?;
        self.collect_field_changes(&mut schema, patch, &mut ddl)?;

        apply_rule_patch(&mut schema, patch);
        if let Some(has_api) = patch.get("has_api").and_then(Value::as_bool) {
            schema.has_api = has_api;
        }

        if let Some(new_name) = patch.get("name").and_then(Value::as_str).map(str::trim) {
            if !new_name.is_empty() && new_name != old_name {
                if schema.system {
                    return Err(MutationError::InvalidArgument(
                        "system entities cannot be renamed".to_string(),
                    ));
                }
                validate_entity_name(new_name)?;
                if self.registry.contains(new_name).await || self.find_row(new_name).await?.is_some() {
                    return Err(MutationError::Conflict(format!(
                        "entity `{new_name}` already exists"
                    )));
                }
                ddl.push(self.dialect().rename_table(&old_name, new_name));
                schema.name = new_name.to_string();
                schema.id = schema_id(new_name);
            }
        }

        let mut tx = self.db.pool.begin().await?;
        for statement in &ddl {
            tracing::debug!(entity = %old_name, %statement, "altering entity");
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        self.persist_row(&mut tx, &old_id, &schema).await?;
        tx.commit().await?;

        self.registry.replace(&old_name, self.db.entity(schema.clone())).await;

        if schema.name != old_name {
            if let Err(err) = self.files.rename_dir(&old_name, &schema.name).await {
                tracing::warn!(old = %old_name, new = %schema.name, %err, "could not rename upload directory");
            }
        }

        Ok(schema)
    }

    pub async fn remove_entity(&self, id_or_name: &str) -> Result<(), MutationError> {
        let _guard = self.registry.lock_mutations().await;

        let row = self.find_row(id_or_name).await?.ok_or(MutationError::NotFound)?;
        let schema = parse_schema_row(&row)?;
        if schema.system {
            return Err(MutationError::InvalidArgument(
                "system entities cannot be deleted".to_string(),
            ));
        }

        sqlx::query(&schema.drop_ddl()).execute(&self.db.pool).await?;
        let row_id = row.get("id").and_then(Value::as_str).unwrap_or(&schema.id);
        self.tables_entity().remove(row_id).await?;
        self.registry.remove(&schema.name).await;

        if let Err(err) = self.files.delete_dir(&schema.name).await {
            tracing::warn!(entity = %schema.name, %err, "could not remove upload directory");
        }

        Ok(())
    }

    fn collect_field_drops(
        &self,
        schema: &mut EntitySchema,
        patch: &Value,
        ddl: &mut Vec<String>,
    ) -> Result<(), MutationError> {
        let Some(deleted) = patch.get("deleted_fields").and_then(Value::as_array) else {
            return Ok(());
        };
        for raw in deleted {
            let name = raw.as_str().map(str::trim).unwrap_or_default();
            if name.is_empty() {
                return Err(MutationError::InvalidArgument(
                    "field name can't be empty".to_string(),
                ));
            }
            let Some(field) = schema.field(name) else { continue };
            if field.system {
                continue;
            }
            ddl.push(self.dialect().drop_column(&schema.name, name));
            schema.fields.retain(|f| f.name != name);
        }
        Ok(())
    }

    fn collect_field_changes(
        &self,
        schema: &mut EntitySchema,
        patch: &Value,
        ddl: &mut Vec<String>,
    ) -> Result<(), MutationError> {
        let Some(fields) = patch.get("fields").and_then(Value::as_array) else {
            return Ok(());
        };
        for raw in fields {
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                return Err(MutationError::InvalidArgument(
                    "field name can't be empty".to_string(),
                ));
            }

            let Some(index) = schema.fields.iter().position(|f| f.name == name) else {
                // Unknown name: a brand-new column.
                let field = parse_user_field(raw)?;
                ddl.push(self.dialect().add_column(&schema.name, &field));
                if field.unique {
                    ddl.push(self.unique_constraint_ddl(&schema.name, &field.name));
                }
                schema.fields.push(field);
                continue;
            };

            if schema.fields[index].system {
                continue;
            }

            // Constraint tweaks on an existing column.
            {
                let field = &mut schema.fields[index];
                if let Some(v) = raw.get("constraints").and_then(|c| c.get("min_value")) {
                    field.constraints.min_value = v.as_f64();
                }
                if let Some(v) = raw.get("constraints").and_then(|c| c.get("max_value")) {
                    field.constraints.max_value = v.as_f64();
                }
                if let Some(v) = raw.get("constraints").and_then(|c| c.get("validator")) {
                    field.constraints.validator = v.as_str().map(String::from);
                }
                if let Some(v) = raw.get("constraints").and_then(|c| c.get("default_value")) {
                    field.constraints.default_value = Some(v.clone());
                }
                if let Some(required) = raw.get("required").and_then(Value::as_bool) {
                    field.required = required;
                }
            }

            if let Some(true) = raw.get("unique").and_then(Value::as_bool) {
                if !schema.fields[index].unique {
                    ddl.push(self.unique_constraint_ddl(&schema.name, &name));
                    schema.fields[index].unique = true;
                }
            }

            if let Some(kind) = raw.get("type") {
                let new_type: db::schema::FieldType = serde_json::from_value(kind.clone())
                    .map_err(|_| {
                        MutationError::InvalidArgument(format!("unknown field type for `{name}`"))
                    })?;
                if schema.fields[index].field_type != new_type {
                    let statement = self
                        .dialect()
                        .alter_column(&schema.name, &name, new_type)
                        .map_err(|err| MutationError::InvalidArgument(err.to_string()))?;
                    ddl.push(statement);
                    schema.fields[index].field_type = new_type;
                }
            }

            if let Some(new_name) = raw.get("new_name").and_then(Value::as_str).map(str::trim) {
                if new_name.is_empty() {
                    return Err(MutationError::InvalidArgument(
                        "field new_name can't be empty".to_string(),
                    ));
                }
                if !is_valid_identifier(new_name) {
                    return Err(MutationError::InvalidArgument(format!(
                        "`{new_name}` is not a valid field name"
                    )));
                }
                ddl.push(self.dialect().rename_column(&schema.name, &name, new_name));
                schema.fields[index].name = new_name.to_string();
            }
        }
        Ok(())
    }

    fn unique_constraint_ddl(&self, table: &str, column: &str) -> String {
        let constraint = self
            .dialect()
            .constraint_unique(&format!("unique_{column}"), column);
        format!("ALTER TABLE {table} ADD {constraint}")
    }

    /// Writes the mutated schema back to `_tables` inside the mutation's
    /// transaction. Raw SQL because the id itself may change on rename,
    /// which the CRUD executor refuses.
    async fn persist_row(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Any>,
        old_id: &str,
        schema: &EntitySchema,
    ) -> Result<(), MutationError> {
        let d = self.dialect();
        let sql = format!(
            "UPDATE _tables SET id = {}, name = {}, type = {}, schema = {}, has_api = {}, updated = {} WHERE id = {}",
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3),
            d.placeholder(4),
            d.placeholder(5),
            d.placeholder(6),
            d.placeholder(7),
        );
        let type_str = serde_json::to_value(schema.entity_type)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "base".to_string());
        sqlx::query(&sql)
            .bind(schema.id.clone())
            .bind(schema.name.clone())
            .bind(type_str)
            .bind(schema.to_json().to_string())
            .bind(i64::from(schema.has_api))
            .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            .bind(old_id.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn validate_entity_name(name: &str) -> Result<(), MutationError> {
    if name.is_empty() {
        return Err(MutationError::InvalidArgument("entity name can't be empty".to_string()));
    }
    if !is_valid_identifier(name) {
        return Err(MutationError::InvalidArgument(format!(
            "`{name}` is not a valid entity name"
        )));
    }
    if name.starts_with('_') {
        return Err(MutationError::InvalidArgument(
            "entity names starting with an underscore are reserved".to_string(),
        ));
    }
    Ok(())
}

fn parse_user_field(raw: &Value) -> Result<EntityField, MutationError> {
    let mut field: EntityField = serde_json::from_value(raw.clone()).map_err(|err| {
        MutationError::InvalidArgument(format!("invalid field definition: {err}"))
    })?;
    if !is_valid_identifier(&field.name) {
        return Err(MutationError::InvalidArgument(format!(
            "`{}` is not a valid field name",
            field.name
        )));
    }
    // User input can never mint system or key columns.
    field.system = false;
    field.primary_key = false;
    Ok(field)
}

fn apply_rule_patch(schema: &mut EntitySchema, patch: &Value) {
    let rule = |key: &str| patch.get(key).and_then(Value::as_str).map(String::from);
    if let Some(r) = rule("list_rule") {
        schema.list_rule = r;
    }
    if let Some(r) = rule("get_rule") {
        schema.get_rule = r;
    }
    if let Some(r) = rule("add_rule") {
        schema.add_rule = r;
    }
    if let Some(r) = rule("update_rule") {
        schema.update_rule = r;
    }
    if let Some(r) = rule("delete_rule") {
        schema.delete_rule = r;
    }
}

fn parse_schema_row(row: &Value) -> Result<EntitySchema, MutationError> {
    let schema_value = row
        .get("schema")
        .ok_or_else(|| MutationError::InvalidArgument("row has no schema column".to_string()))?;
    EntitySchema::from_json(schema_value)
        .map_err(|err| MutationError::InvalidArgument(format!("unparseable schema: {err}")))
}
