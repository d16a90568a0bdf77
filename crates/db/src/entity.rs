use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{Any, AnyPool};
use thiserror::Error;
use utils::ids::{RECORD_ID_SUFFIX_LEN, generate_time_based_id};
use utils::response::Pagination;

use crate::dialect::Dialect;
use crate::records::{bind_field, dynamic_record, record_from_row, redact_password};
use crate::schema::{EntitySchema, FieldType};

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("record not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

/// Maps driver errors, promoting unique violations to conflicts so they
/// surface with the driver message at 400.
fn map_db_err(err: sqlx::Error) -> EntityError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return EntityError::Conflict(db_err.message().to_string());
        }
    }
    EntityError::Database(err)
}

#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub page_index: i64,
    pub per_page: i64,
    pub count_pages: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            page_index: 1,
            per_page: 30,
            count_pages: false,
        }
    }
}

#[derive(Debug)]
pub struct ListResult {
    pub records: Vec<Value>,
    pub pagination: Pagination,
}

pub struct UpdateResult {
    pub record: Value,
    /// Files referenced by the previous row but absent from the new value.
    /// Deleted by the caller only after the transaction has committed.
    pub stale_files: Vec<String>,
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Typed runtime view over one schema: every read and write on the backing
/// table goes through here.
#[derive(Clone)]
pub struct Entity {
    schema: EntitySchema,
    pool: AnyPool,
    dialect: Dialect,
}

impl Entity {
    pub fn new(schema: EntitySchema, pool: AnyPool, dialect: Dialect) -> Self {
        Entity { schema, pool, dialect }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Picks a fresh record id: time-ordered with a random suffix.
    /// Collisions retry up to ten times, widening the random part per
    /// attempt past the fifth.
    async fn next_id(&self) -> String {
        let mut id = generate_time_based_id(RECORD_ID_SUFFIX_LEN);
        for trial in 1..=10usize {
            if !self.record_exists(&id).await {
                break;
            }
            let suffix = if trial > 5 {
                RECORD_ID_SUFFIX_LEN + trial % 5
            } else {
                RECORD_ID_SUFFIX_LEN
            };
            id = generate_time_based_id(suffix);
        }
        id
    }

    pub async fn create(&self, body: &Value) -> Result<Value, EntityError> {
        let id = self.next_id().await;
        self.create_with_id(&id, body).await
    }

    /// Insert under a caller-chosen id. Used for rows whose id is derived
    /// rather than random: `_tables` entries and the settings singleton.
    pub async fn create_with_id(&self, id: &str, body: &Value) -> Result<Value, EntityError> {
        if self.schema.is_view() {
            return Err(EntityError::InvalidArgument(
                "cannot create records on a view entity".to_string(),
            ));
        }

        let id = id.to_string();
        let now = now_string();

        let mut columns = Vec::with_capacity(self.schema.fields.len());
        let mut values: Vec<(String, FieldType, Value)> = Vec::with_capacity(self.schema.fields.len());
        for field in &self.schema.fields {
            let value = match field.name.as_str() {
                "id" => Value::String(id.clone()),
                "created" | "updated" => Value::String(now.clone()),
                "password" => {
                    let plain = body.get("password").and_then(Value::as_str).unwrap_or_default();
                    Value::String(hash_password(plain)?)
                }
                name => body
                    .get(name)
                    .cloned()
                    .or_else(|| field.constraints.default_value.clone())
                    .unwrap_or(Value::Null),
            };
            columns.push(field.name.clone());
            values.push((field.name.clone(), field.field_type, value));
        }

        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| self.dialect.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.schema.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        tracing::trace!(entity = %self.schema.name, %sql, "create");

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query::<Any>(&sql);
        for (name, kind, value) in &values {
            query = bind_field(query, name, *kind, value)?;
        }
        query.execute(&mut *tx).await.map_err(map_db_err)?;
        tx.commit().await?;

        self.read(&id)
            .await?
            .ok_or_else(|| EntityError::Internal("created record missing on re-read".to_string()))
    }

    /// Row by primary key, redacted for auth entities.
    pub async fn read(&self, id: &str) -> Result<Option<Value>, EntityError> {
        let mut record = self.read_raw(id).await?;
        if self.schema.is_auth() {
            if let Some(record) = record.as_mut() {
                redact_password(record);
            }
        }
        Ok(record)
    }

    /// Row by primary key with the password hash intact. Stays inside the
    /// crate except for credential verification.
    pub async fn read_raw(&self, id: &str) -> Result<Option<Value>, EntityError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = {}",
            self.schema.name,
            self.dialect.placeholder(1)
        );
        let row = sqlx::query::<Any>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            if self.schema.is_view() {
                dynamic_record(&row)
            } else {
                record_from_row(&self.schema, &row)
            }
        }))
    }

    pub async fn list(&self, opts: &ListOptions) -> Result<ListResult, EntityError> {
        if opts.page_index < 1 {
            return Err(EntityError::InvalidArgument(
                "page_index should be 1 or greater".to_string(),
            ));
        }
        if opts.per_page < 1 {
            return Err(EntityError::InvalidArgument(
                "per_page should be greater than zero".to_string(),
            ));
        }

        let order = if self.schema.has_field("created") {
            " ORDER BY created DESC"
        } else {
            ""
        };
        let offset = (opts.page_index - 1) * opts.per_page;
        let sql = format!(
            "SELECT * FROM {}{} LIMIT {} OFFSET {}",
            self.schema.name, order, opts.per_page, offset
        );
        let rows = sqlx::query::<Any>(&sql).fetch_all(&self.pool).await?;
        let records: Vec<Value> = rows
            .iter()
            .map(|row| {
                let mut record = if self.schema.is_view() {
                    dynamic_record(row)
                } else {
                    record_from_row(&self.schema, row)
                };
                if self.schema.is_auth() {
                    redact_password(&mut record);
                }
                record
            })
            .collect();

        let pagination = if opts.count_pages {
            let count_expr = if self.schema.is_view() { "COUNT(*)" } else { "COUNT(id)" };
            let sql = format!("SELECT {count_expr} FROM {}", self.schema.name);
            let record_count: i64 = sqlx::query_scalar::<Any, i64>(&sql)
                .fetch_one(&self.pool)
                .await?;
            Pagination {
                page_index: opts.page_index,
                per_page: opts.per_page,
                page_count: (record_count + opts.per_page - 1) / opts.per_page,
                record_count,
            }
        } else {
            Pagination {
                page_index: opts.page_index,
                per_page: opts.per_page,
                page_count: -1,
                record_count: -1,
            }
        };

        Ok(ListResult { records, pagination })
    }

    pub async fn update(&self, id: &str, body: &Value) -> Result<UpdateResult, EntityError> {
        if self.schema.is_view() {
            return Err(EntityError::InvalidArgument(
                "cannot update records on a view entity".to_string(),
            ));
        }

        let mut old = self.read_raw(id).await?.ok_or(EntityError::NotFound)?;

        // Diff file fields before writing: whatever the old row references
        // that the new value no longer does gets removed from disk after
        // commit. A null or empty new value clears the field entirely.
        let mut stale_files = Vec::new();
        for field in self.schema.file_fields() {
            let Some(new_value) = body.get(&field.name) else { continue };
            let old_names = collect_file_names(old.get(&field.name));
            let new_names = collect_file_names(Some(new_value));
            stale_files.extend(old_names.into_iter().filter(|n| !new_names.contains(n)));
        }

        // Only schema fields may be written; id/created/updated are managed
        // here and silently ignored when clients send them.
        let mut updates: Vec<(String, FieldType, Value)> = Vec::new();
        if let Value::Object(map) = body {
            for (key, value) in map {
                if matches!(key.as_str(), "id" | "created" | "updated") {
                    continue;
                }
                let Some(field) = self.schema.field(key) else { continue };
                let value = if key == "password" {
                    Value::String(hash_password(value.as_str().unwrap_or_default())?)
                } else {
                    value.clone()
                };
                updates.push((field.name.clone(), field.field_type, value));
            }
        }

        if updates.is_empty() {
            if self.schema.is_auth() {
                redact_password(&mut old);
            }
            return Ok(UpdateResult { record: old, stale_files: Vec::new() });
        }

        updates.push(("updated".to_string(), FieldType::Date, Value::String(now_string())));

        let assignments: Vec<String> = updates
            .iter()
            .enumerate()
            .map(|(i, (name, _, _))| format!("{} = {}", name, self.dialect.placeholder(i + 1)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = {}",
            self.schema.name,
            assignments.join(", "),
            self.dialect.placeholder(updates.len() + 1)
        );
        tracing::trace!(entity = %self.schema.name, %sql, "update");

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query::<Any>(&sql);
        for (name, kind, value) in &updates {
            query = bind_field(query, name, *kind, value)?;
        }
        query = query.bind(id.to_string());
        query.execute(&mut *tx).await.map_err(map_db_err)?;
        tx.commit().await?;

        let record = self
            .read(id)
            .await?
            .ok_or_else(|| EntityError::Internal("updated record missing on re-read".to_string()))?;
        Ok(UpdateResult { record, stale_files })
    }

    /// Deletes the row and returns the pre-delete record so the caller can
    /// clean up referenced files once the transaction is done.
    pub async fn remove(&self, id: &str) -> Result<Value, EntityError> {
        if self.schema.is_view() {
            return Err(EntityError::InvalidArgument(
                "cannot remove records from a view entity".to_string(),
            ));
        }

        let mut old = self.read_raw(id).await?.ok_or(EntityError::NotFound)?;

        let sql = format!(
            "DELETE FROM {} WHERE id = {}",
            self.schema.name,
            self.dialect.placeholder(1)
        );
        let mut tx = self.pool.begin().await?;
        sqlx::query::<Any>(&sql)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        tx.commit().await?;

        if self.schema.is_auth() {
            redact_password(&mut old);
        }
        Ok(old)
    }

    /// Single row where any of `columns` equals `value`. Used by the admin
    /// CLI to resolve an account by id or email.
    pub async fn query_from_cols(
        &self,
        value: &str,
        columns: &[&str],
    ) -> Result<Option<Value>, EntityError> {
        if columns.is_empty() {
            return Err(EntityError::InvalidArgument("no columns to match on".to_string()));
        }
        for column in columns {
            if !self.schema.has_field(column) {
                return Err(EntityError::InvalidArgument(format!("unknown column `{column}`")));
            }
        }

        let clauses: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c, self.dialect.placeholder(i + 1)))
            .collect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            self.schema.name,
            clauses.join(" OR ")
        );
        let mut query = sqlx::query::<Any>(&sql);
        for _ in columns {
            query = query.bind(value.to_string());
        }
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|row| {
            let mut record = record_from_row(&self.schema, &row);
            if self.schema.is_auth() {
                redact_password(&mut record);
            }
            record
        }))
    }

    /// False on any driver error so the id-retry loop cannot spin forever.
    pub async fn record_exists(&self, id: &str) -> bool {
        let sql = format!(
            "SELECT COUNT(id) FROM {} WHERE id = {} LIMIT 1",
            self.schema.name,
            self.dialect.placeholder(1)
        );
        match sqlx::query_scalar::<Any, i64>(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
        {
            Ok(count) => count > 0,
            Err(err) => {
                tracing::trace!(entity = %self.schema.name, %err, "record_exists probe failed");
                false
            }
        }
    }

    /// Auth-entity row by email with the password hash intact, for
    /// credential verification only.
    pub async fn find_auth_record(&self, email: &str) -> Result<Option<Value>, EntityError> {
        if !self.schema.is_auth() {
            return Err(EntityError::InvalidArgument(format!(
                "`{}` is not an auth entity",
                self.schema.name
            )));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE email = {} LIMIT 1",
            self.schema.name,
            self.dialect.placeholder(1)
        );
        let row = sqlx::query::<Any>(&sql)
            .bind(email.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| record_from_row(&self.schema, &row)))
    }
}

pub fn hash_password(plain: &str) -> Result<String, EntityError> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST)
        .map_err(|e| EntityError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(record: &Value, plain: &str) -> bool {
    let Some(hash) = record.get("password").and_then(Value::as_str) else {
        return false;
    };
    bcrypt::verify(plain, hash).unwrap_or(false)
}

fn collect_file_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("secret12").unwrap();
        assert_ne!(hash, "secret12");
        let record = serde_json::json!({"password": hash});
        assert!(verify_password(&record, "secret12"));
        assert!(!verify_password(&record, "wrong"));
    }

    #[test]
    fn verify_rejects_missing_hash() {
        assert!(!verify_password(&serde_json::json!({}), "anything"));
    }

    #[test]
    fn collect_file_names_handles_shapes() {
        assert_eq!(
            collect_file_names(Some(&serde_json::json!("a.png"))),
            vec!["a.png"]
        );
        assert_eq!(
            collect_file_names(Some(&serde_json::json!(["a", "b"]))),
            vec!["a", "b"]
        );
        assert!(collect_file_names(Some(&Value::Null)).is_empty());
        assert!(collect_file_names(None).is_empty());
    }
}
