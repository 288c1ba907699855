use crate::error::Result;
use crate::models::{EntityId, ProjectEntity, ProjectId};
use crate::state::EntityStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// In-memory entity store (for single-process deployments and testing)
#[derive(Clone)]
pub struct InMemoryEntityStore<E> {
    entities: Arc<RwLock<BTreeMap<EntityId, E>>>,
}

impl<E: ProjectEntity> InMemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Insert or replace an entity
    pub fn save(&self, entity: E) {
        let id = entity.id();
        self.entities.write().insert(id, entity);
        tracing::debug!(entity_id = id, "Entity saved");
    }

    /// Remove an entity, returning it if present
    pub fn remove(&self, id: EntityId) -> Option<E> {
        let removed = self.entities.write().remove(&id);
        if removed.is_some() {
            tracing::debug!(entity_id = id, "Entity removed");
        }
        removed
    }

    /// Remove every entity of a project, returning the removed IDs
    pub fn remove_project(&self, project_id: ProjectId) -> Vec<EntityId> {
        let mut entities = self.entities.write();
        let ids: Vec<EntityId> = entities
            .values()
            .filter(|entity| entity.project_id() == project_id)
            .map(|entity| entity.id())
            .collect();
        for id in &ids {
            entities.remove(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl<E: ProjectEntity> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: ProjectEntity> EntityStore<E> for InMemoryEntityStore<E> {
    async fn load(&self, id: EntityId) -> Result<Option<E>> {
        Ok(self.entities.read().get(&id).cloned())
    }

    async fn query_after(&self, after: EntityId, limit: usize) -> Result<Vec<E>> {
        Ok(self
            .entities
            .read()
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(_, entity)| entity.clone())
            .collect())
    }

    async fn query_ids(&self, ids: &[EntityId]) -> Result<Vec<E>> {
        let entities = self.entities.read();
        Ok(ids.iter().filter_map(|id| entities.get(id).cloned()).collect())
    }
}
