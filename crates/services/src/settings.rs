use db::entity::{Entity, EntityError};
use db::schema::{ADMINS_TABLE, schema_id};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use crate::auth::{DEFAULT_ADMIN_SESSION_TIMEOUT, DEFAULT_SESSION_TIMEOUT};

/// The singleton `_settings` row keyed off the literal "configs".
pub fn settings_row_id() -> String {
    schema_id("configs")
}

pub fn default_settings() -> Value {
    json!({
        "appName": "ACME Project",
        "baseUrl": "https://acme.example.com",
        "maintenanceMode": false,
        "maxFileSize": 10,
        "allowRegistration": true,
        "emailVerificationRequired": false,
        "sessionTimeout": DEFAULT_SESSION_TIMEOUT,
        "adminSessionTimeout": DEFAULT_ADMIN_SESSION_TIMEOUT,
        "mode": "PROD",
    })
}

/// In-memory cache over the `_settings` singleton. Reads come from the
/// cache; updates write the row and the cache together.
pub struct SettingsService {
    entity: Entity,
    cache: RwLock<Value>,
}

impl SettingsService {
    /// Loads the singleton row, seeding it with defaults when absent.
    pub async fn load_or_init(entity: Entity) -> Result<Self, EntityError> {
        let id = settings_row_id();
        let configs = match entity.read(&id).await? {
            Some(row) => row
                .get("value")
                .cloned()
                .filter(Value::is_object)
                .unwrap_or_else(default_settings),
            None => {
                let defaults = default_settings();
                entity
                    .create_with_id(&id, &json!({"value": defaults}))
                    .await?;
                tracing::debug!("seeded default settings row");
                defaults
            }
        };
        Ok(SettingsService {
            entity,
            cache: RwLock::new(configs),
        })
    }

    pub async fn configs(&self) -> Value {
        self.cache.read().await.clone()
    }

    /// Applies a patch, key by key, keeping only the keys settings knows
    /// about. Persists the merged object, then refreshes the cache.
    pub async fn update(&self, patch: &Value) -> Result<Value, EntityError> {
        let merged = {
            let current = self.cache.read().await;
            merge_known_keys(&current, patch)
        };
        self.entity
            .update(&settings_row_id(), &json!({"value": merged}))
            .await?;
        let mut cache = self.cache.write().await;
        *cache = merged.clone();
        Ok(merged)
    }

    /// Token lifetime for a login against `table`, in seconds.
    pub async fn session_timeout(&self, table: &str) -> i64 {
        let configs = self.cache.read().await;
        let key = if table == ADMINS_TABLE {
            "adminSessionTimeout"
        } else {
            "sessionTimeout"
        };
        let fallback = if table == ADMINS_TABLE {
            DEFAULT_ADMIN_SESSION_TIMEOUT
        } else {
            DEFAULT_SESSION_TIMEOUT
        };
        configs.get(key).and_then(Value::as_i64).unwrap_or(fallback)
    }
}

fn merge_known_keys(current: &Value, patch: &Value) -> Value {
    let mut merged: Map<String, Value> = current.as_object().cloned().unwrap_or_default();
    if let Value::Object(defaults) = default_settings() {
        for key in defaults.keys() {
            if let Some(value) = patch.get(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}
