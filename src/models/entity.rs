//! Domain entities that belong to a project

/// Identifier assigned by the entity store; monotonically increasing per entity type
pub type EntityId = u64;

/// Identifier of the project owning an entity
pub type ProjectId = u64;

/// An entity stored by the platform that belongs to exactly one project.
///
/// Issues, commits, wiki pages and similar records implement this so their
/// text can be indexed per entity type.
pub trait ProjectEntity: Clone + Send + Sync + 'static {
    /// Store-assigned identifier, unique within the entity type
    fn id(&self) -> EntityId;

    /// Identifier of the owning project
    fn project_id(&self) -> ProjectId;
}
