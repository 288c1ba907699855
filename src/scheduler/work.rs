//! Work items and the worker contract

use super::error::SchedulerResult;
use crate::models::EntityId;
use async_trait::async_trait;

/// One unit of index maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexWork {
    /// Reindex a single entity
    Entity(EntityId),

    /// Index every entity after the progress mark
    Scan,
}

/// A named consumer of batched [`IndexWork`]
#[async_trait]
pub trait BatchWorker: Send + Sync + 'static {
    /// Unique name; work submitted under the same name shares one pending set
    fn name(&self) -> &str;

    /// Lower values are served first
    fn priority(&self) -> u32;

    /// Process everything drained from the pending set in one go
    async fn do_works(&self, works: Vec<IndexWork>) -> SchedulerResult<()>;
}
