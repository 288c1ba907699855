//! Index lifecycle: version check, rebuild, reader management

use crate::models::EntityId;
use crate::search::analyzer::register_analyzer;
use crate::search::document::{stored_u64, CoreFields, DocKind};
use crate::search::error::{SearchError, SearchResult};
use crate::search::writer::WriteSerializer;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema};
use tantivy::{Index, IndexReader, ReloadPolicy, Searcher, TantivyDocument};
use tracing::{debug, info, warn};

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Index name
    pub index_name: String,

    /// Total number of live documents, markers included
    pub total_documents: u64,

    /// Number of entity documents
    pub entity_documents: u64,

    /// Schema version found on disk
    pub schema_version: Option<u64>,

    /// Highest scanned entity identifier
    pub progress_mark: EntityId,

    /// Number of segments
    pub num_segments: usize,

    /// Index size in bytes
    pub index_size_bytes: u64,

    /// Last commit made by this process
    pub last_commit: Option<DateTime<Utc>>,
}

impl IndexStats {
    /// Collect statistics from a searcher over the index at `dir`
    pub fn collect(
        index_name: &str,
        dir: &Path,
        searcher: &Searcher,
        last_commit: Option<DateTime<Utc>>,
    ) -> SearchResult<Self> {
        let core = CoreFields::resolve(searcher.schema())?;

        let total_documents = searcher.search(&AllQuery, &Count).map_err(|e| {
            SearchError::SearchFailed(format!("Failed to count documents: {}", e))
        })? as u64;
        let entity_documents = searcher
            .search(
                &TermQuery::new(core.kind_term(DocKind::Entity), IndexRecordOption::Basic),
                &Count,
            )
            .map_err(|e| SearchError::SearchFailed(format!("Failed to count entities: {}", e)))?
            as u64;

        // Approximate: files directly under the index directory
        let index_size_bytes = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);

        Ok(Self {
            index_name: index_name.to_string(),
            total_documents,
            entity_documents,
            schema_version: read_marker(
                searcher,
                &core,
                DocKind::SchemaMarker,
                core.index_version,
            )?,
            progress_mark: read_marker(
                searcher,
                &core,
                DocKind::ProgressMarker,
                core.last_entity_id,
            )?
            .unwrap_or(0),
            num_segments: searcher.segment_readers().len(),
            index_size_bytes,
            last_commit,
        })
    }
}

/// Stored value of the singleton marker document of `kind`
pub fn read_marker(
    searcher: &Searcher,
    core: &CoreFields,
    kind: DocKind,
    value_field: Field,
) -> SearchResult<Option<u64>> {
    let query = TermQuery::new(core.kind_term(kind), IndexRecordOption::Basic);
    let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;

    match top_docs.first() {
        Some((_, address)) => {
            let doc: TantivyDocument = searcher.doc(*address)?;
            Ok(stored_u64(&doc, value_field))
        }
        None => Ok(None),
    }
}

struct OpenIndex {
    reader: IndexReader,
}

/// Owns the on-disk index of one entity type and its long-lived reader
pub struct IndexLifecycle {
    name: String,
    dir: PathBuf,
    schema: Schema,
    version: u64,
    state: RwLock<Option<OpenIndex>>,
    last_commit: RwLock<Option<DateTime<Utc>>>,
}

impl IndexLifecycle {
    pub fn new(name: impl Into<String>, dir: PathBuf, schema: Schema, version: u64) -> Self {
        Self {
            name: name.into(),
            dir,
            schema,
            version,
            state: RwLock::new(None),
            last_commit: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Validate the on-disk index, rebuilding it when stale, then open the reader
    pub fn start(&self, writer: &WriteSerializer) -> SearchResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to create index directory: {}", e))
        })?;

        match self.stored_version() {
            Some(version) if version == self.version => {
                debug!(index = %self.name, version, "Index is up to date");
            }
            found => {
                info!(
                    index = %self.name,
                    found = ?found,
                    expected = self.version,
                    "Rebuilding index"
                );
                self.wipe()?;
                writer.with_writer(|tx| tx.put_schema_marker(self.version))?;
            }
        }

        let index = self.open_index()?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create reader: {}", e)))?;

        *self.state.write() = Some(OpenIndex { reader });
        info!(index = %self.name, dir = %self.dir.display(), "Index opened");
        Ok(())
    }

    /// Release the reader; safe to call before or without `start`
    pub fn stop(&self) {
        if self.state.write().take().is_some() {
            info!(index = %self.name, "Index closed");
        }
    }

    /// Reload the reader so it sees the latest commit; failures are only logged
    pub fn refresh(&self) {
        if let Some(open) = self.state.read().as_ref() {
            if let Err(e) = open.reader.reload() {
                warn!(index = %self.name, error = %e, "Failed to refresh index reader");
            }
        }
    }

    /// Snapshot of the index; `None` until started
    pub fn searcher(&self) -> Option<Searcher> {
        self.state.read().as_ref().map(|open| open.reader.searcher())
    }

    /// Progress mark as committed on disk, 0 when absent
    pub fn read_progress_mark(&self) -> SearchResult<EntityId> {
        let searcher = self.fresh_searcher()?;
        let core = CoreFields::resolve(searcher.schema())?;
        let mark = read_marker(
            &searcher,
            &core,
            DocKind::ProgressMarker,
            core.last_entity_id,
        )?;
        Ok(mark.unwrap_or(0))
    }

    pub fn stats(&self) -> SearchResult<IndexStats> {
        let searcher = match self.searcher() {
            Some(searcher) => searcher,
            None => self.fresh_searcher()?,
        };
        IndexStats::collect(&self.name, &self.dir, &searcher, *self.last_commit.read())
    }

    /// Open the index for writing, creating it when the directory is empty
    pub(crate) fn open_index(&self) -> SearchResult<Index> {
        let directory = MmapDirectory::open(&self.dir).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to open index directory: {}", e))
        })?;
        let index = Index::open_or_create(directory, self.schema.clone())?;
        register_analyzer(&index);
        Ok(index)
    }

    pub(crate) fn mark_committed(&self) {
        *self.last_commit.write() = Some(Utc::now());
    }

    fn fresh_searcher(&self) -> SearchResult<Searcher> {
        let index = self.open_index()?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(reader.searcher())
    }

    /// Schema version of a readable, layout-compatible index on disk
    fn stored_version(&self) -> Option<u64> {
        match self.inspect_on_disk() {
            Ok(version) => version,
            Err(e) => {
                warn!(index = %self.name, error = %e, "Existing index is unreadable");
                None
            }
        }
    }

    fn inspect_on_disk(&self) -> SearchResult<Option<u64>> {
        let directory = MmapDirectory::open(&self.dir).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to open index directory: {}", e))
        })?;
        let exists = Index::exists(&directory).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to read index meta: {}", e))
        })?;
        if !exists {
            return Ok(None);
        }

        let index = Index::open(directory)?;
        if !same_layout(&index.schema(), &self.schema)? {
            info!(index = %self.name, "Index field layout changed");
            return Ok(None);
        }

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let searcher = reader.searcher();
        let core = CoreFields::resolve(searcher.schema())?;
        read_marker(&searcher, &core, DocKind::SchemaMarker, core.index_version)
    }

    fn wipe(&self) -> SearchResult<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}

fn same_layout(on_disk: &Schema, expected: &Schema) -> SearchResult<bool> {
    let on_disk = serde_json::to_value(on_disk)
        .map_err(|e| SearchError::SchemaError(e.to_string()))?;
    let expected = serde_json::to_value(expected)
        .map_err(|e| SearchError::SchemaError(e.to_string()))?;
    Ok(on_disk == expected)
}
