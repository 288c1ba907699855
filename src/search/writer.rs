//! Single-writer transactions over one entity index

use crate::models::{EntityId, ProjectId};
use crate::search::document::{CoreFields, DocKind, EntityDocument};
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::IndexLifecycle;
use parking_lot::Mutex;
use std::sync::Arc;
use tantivy::IndexWriter;
use tracing::{debug, warn};

/// Mutations staged inside [`WriteSerializer::with_writer`]
pub struct IndexTransaction<'a> {
    writer: &'a mut IndexWriter,
    core: CoreFields,
    upserts: usize,
    deletes: usize,
}

impl<'a> IndexTransaction<'a> {
    /// Replace any document of the same entity
    pub fn upsert(&mut self, document: EntityDocument) -> SearchResult<()> {
        self.writer.delete_term(self.core.entity_term(document.entity_id));
        self.writer.add_document(document.document).map_err(|e| {
            SearchError::IndexingFailed(format!(
                "Failed to add entity {}: {}",
                document.entity_id, e
            ))
        })?;
        self.upserts += 1;
        Ok(())
    }

    pub fn delete_entity(&mut self, entity_id: EntityId) {
        self.writer.delete_term(self.core.entity_term(entity_id));
        self.deletes += 1;
    }

    /// Remove every entity document of a project; markers are untouched
    pub fn delete_project(&mut self, project_id: ProjectId) {
        self.writer.delete_term(self.core.project_term(project_id));
        self.deletes += 1;
    }

    pub fn put_schema_marker(&mut self, version: u64) -> SearchResult<()> {
        self.writer.delete_term(self.core.kind_term(DocKind::SchemaMarker));
        self.writer
            .add_document(self.core.schema_marker(version))
            .map_err(|e| {
                SearchError::IndexingFailed(format!("Failed to write schema marker: {}", e))
            })?;
        Ok(())
    }

    pub fn put_progress_mark(&mut self, last_entity_id: EntityId) -> SearchResult<()> {
        self.writer.delete_term(self.core.kind_term(DocKind::ProgressMarker));
        self.writer
            .add_document(self.core.progress_marker(last_entity_id))
            .map_err(|e| {
                SearchError::IndexingFailed(format!("Failed to write progress mark: {}", e))
            })?;
        Ok(())
    }
}

/// Serializes every mutation of one index behind a mutex
pub struct WriteSerializer {
    lifecycle: Arc<IndexLifecycle>,
    lock: Mutex<()>,
    heap_size: usize,
}

impl WriteSerializer {
    pub fn new(lifecycle: Arc<IndexLifecycle>, heap_size: usize) -> Self {
        Self {
            lifecycle,
            lock: Mutex::new(()),
            heap_size,
        }
    }

    pub fn lifecycle(&self) -> &Arc<IndexLifecycle> {
        &self.lifecycle
    }

    /// Run `mutate` in a transaction.
    ///
    /// Commits when `mutate` succeeds and rolls back otherwise. The reader is
    /// refreshed afterwards either way.
    pub fn with_writer<T, F>(&self, mutate: F) -> SearchResult<T>
    where
        F: FnOnce(&mut IndexTransaction<'_>) -> SearchResult<T>,
    {
        let _guard = self.lock.lock();
        let result = self.run_transaction(mutate);
        self.lifecycle.refresh();
        result
    }

    fn run_transaction<T, F>(&self, mutate: F) -> SearchResult<T>
    where
        F: FnOnce(&mut IndexTransaction<'_>) -> SearchResult<T>,
    {
        let index = self.lifecycle.open_index()?;
        let core = CoreFields::resolve(&index.schema())?;
        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, self.heap_size)
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to create writer: {}", e)))?;

        let mut tx = IndexTransaction {
            writer: &mut writer,
            core,
            upserts: 0,
            deletes: 0,
        };
        let outcome = mutate(&mut tx);
        let (upserts, deletes) = (tx.upserts, tx.deletes);

        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                rollback(&mut writer, self.lifecycle.name());
                return Err(e);
            }
        };

        if let Err(e) = writer.commit() {
            rollback(&mut writer, self.lifecycle.name());
            return Err(SearchError::IndexingFailed(format!("Failed to commit: {}", e)));
        }
        writer.wait_merging_threads().map_err(|e| {
            SearchError::IndexingFailed(format!("Failed to finish merges: {}", e))
        })?;

        self.lifecycle.mark_committed();
        debug!(index = %self.lifecycle.name(), upserts, deletes, "Committed index transaction");
        Ok(value)
    }
}

fn rollback(writer: &mut IndexWriter, index_name: &str) {
    if let Err(e) = writer.rollback() {
        warn!(index = %index_name, error = %e, "Failed to roll back index writer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::config::{FieldKind, FieldSpec};
    use crate::search::document::build_entity_schema;
    use tantivy::TantivyDocument;
    use tempfile::TempDir;

    fn serializer(dir: &std::path::Path) -> WriteSerializer {
        let schema = build_entity_schema(&[FieldSpec::new("title", FieldKind::Keyword)]);
        let lifecycle = Arc::new(IndexLifecycle::new("issue", dir.join("issue"), schema, 1));
        WriteSerializer::new(lifecycle, 15_000_000)
    }

    fn entity(writer: &WriteSerializer, id: EntityId, project: ProjectId) -> EntityDocument {
        let core = CoreFields::resolve(writer.lifecycle().schema()).unwrap();
        EntityDocument::new(&core, id, project, TantivyDocument::new())
    }

    #[test]
    fn test_failed_callback_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let writer = serializer(temp_dir.path());
        writer.lifecycle().start(&writer).unwrap();

        let result: SearchResult<()> = writer.with_writer(|tx| {
            tx.upsert(entity(&writer, 1, 1))?;
            tx.put_progress_mark(10)?;
            Err(SearchError::IndexingFailed("injected".to_string()))
        });
        assert!(result.is_err());

        let stats = writer.lifecycle().stats().unwrap();
        assert_eq!(stats.entity_documents, 0);
        assert_eq!(stats.progress_mark, 0);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let writer = serializer(temp_dir.path());
        writer.lifecycle().start(&writer).unwrap();

        for _ in 0..3 {
            writer.with_writer(|tx| tx.upsert(entity(&writer, 5, 1))).unwrap();
        }
        assert_eq!(writer.lifecycle().stats().unwrap().entity_documents, 1);
    }

    #[test]
    fn test_delete_project_keeps_markers() {
        let temp_dir = TempDir::new().unwrap();
        let writer = serializer(temp_dir.path());
        writer.lifecycle().start(&writer).unwrap();

        writer
            .with_writer(|tx| {
                tx.upsert(entity(&writer, 1, 1))?;
                tx.upsert(entity(&writer, 2, 2))?;
                tx.put_progress_mark(2)
            })
            .unwrap();
        writer
            .with_writer(|tx| {
                tx.delete_project(1);
                Ok(())
            })
            .unwrap();

        let stats = writer.lifecycle().stats().unwrap();
        assert_eq!(stats.entity_documents, 1);
        assert_eq!(stats.progress_mark, 2);
        assert_eq!(stats.schema_version, Some(1));
    }
}
