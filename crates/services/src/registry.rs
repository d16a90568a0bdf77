use std::collections::HashMap;

use db::entity::Entity;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Shared name→Entity map backing the dynamic route set. Request handlers
/// read it under a shared lock; schema mutations replace entries under the
/// write lock so concurrent readers observe either the pre- or the
/// post-mutation state, never a partial swap.
#[derive(Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, Entity>>,
    mutation_lock: Mutex<()>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes schema mutations. Held across the whole DDL + `_tables` +
    /// swap sequence.
    pub async fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock.lock().await
    }

    pub async fn get(&self, name: &str) -> Option<Entity> {
        self.entities.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entities.read().await.contains_key(name)
    }

    pub async fn insert(&self, entity: Entity) {
        self.entities
            .write()
            .await
            .insert(entity.name().to_string(), entity);
    }

    pub async fn remove(&self, name: &str) -> Option<Entity> {
        self.entities.write().await.remove(name)
    }

    /// Atomic rename: the old route set disappears and the new one appears
    /// in one write-lock section.
    pub async fn replace(&self, old_name: &str, entity: Entity) {
        let mut entities = self.entities.write().await;
        entities.remove(old_name);
        entities.insert(entity.name().to_string(), entity);
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
