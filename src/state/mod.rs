pub mod store;

pub use store::*;

use crate::error::Result;
use crate::models::{EntityId, ProjectEntity};
use async_trait::async_trait;

/// Authoritative storage of entities of one type
#[async_trait]
pub trait EntityStore<E: ProjectEntity>: Send + Sync {
    /// Load an entity by ID
    async fn load(&self, id: EntityId) -> Result<Option<E>>;

    /// Entities with an ID strictly greater than `after`, ordered by ID, at most `limit`
    async fn query_after(&self, after: EntityId, limit: usize) -> Result<Vec<E>>;

    /// Entities whose IDs are in `ids`; missing IDs are skipped, order is unspecified
    async fn query_ids(&self, ids: &[EntityId]) -> Result<Vec<E>>;
}
