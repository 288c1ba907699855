//! Per-entity-type text index service

use crate::cluster::ClusterManager;
use crate::config::Config;
use crate::models::{EntityId, ProjectEntity, ProjectId};
use crate::scheduler::{BatchWorkManager, BatchWorker, IndexWork, SchedulerResult};
use crate::search::config::EntityIndexConfig;
use crate::search::coordinator::{order_by_rank, QueryCoordinator};
use crate::search::document::{stored_u64, CoreFields, DocumentBuilder, EntityDocument};
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::{IndexLifecycle, IndexStats};
use crate::search::metrics::SEARCH_METRICS;
use crate::search::query::QueryTranslator;
use crate::search::registry::LocalTextIndex;
use crate::search::writer::WriteSerializer;
use crate::state::EntityStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tantivy::collector::{Count, TopDocs};
use tantivy::TantivyDocument;
use tracing::{debug, info, warn};

/// Keeps the text index of one entity type in sync with the entity store and
/// answers cluster-wide queries against it
pub struct ProjectTextManager<E: ProjectEntity> {
    config: EntityIndexConfig<E>,
    lifecycle: Arc<IndexLifecycle>,
    writer: WriteSerializer,
    translator: QueryTranslator,
    core: CoreFields,
    store: Arc<dyn EntityStore<E>>,
    cluster: Arc<dyn ClusterManager>,
    coordinator: QueryCoordinator,
    work_manager: Arc<BatchWorkManager>,
    worker: Arc<dyn BatchWorker>,
    batch_size: usize,
}

impl<E: ProjectEntity> ProjectTextManager<E> {
    pub fn new(
        config: EntityIndexConfig<E>,
        app_config: &Config,
        store: Arc<dyn EntityStore<E>>,
        cluster: Arc<dyn ClusterManager>,
        work_manager: Arc<BatchWorkManager>,
    ) -> SearchResult<Arc<Self>> {
        app_config.validate()?;

        let schema = config.schema();
        let core = CoreFields::resolve(&schema)?;
        let translator = QueryTranslator::new(&schema, config.default_query_fields())?;
        let lifecycle = Arc::new(IndexLifecycle::new(
            config.index_name(),
            config.index_dir(&app_config.index_root()),
            schema,
            config.version(),
        ));
        let writer = WriteSerializer::new(
            Arc::clone(&lifecycle),
            app_config.indexing.writer_heap_size,
        );
        let coordinator = QueryCoordinator::new(
            config.index_name(),
            Arc::clone(&cluster),
            app_config.cluster.fanout_timeout(),
        );
        let worker_name = format!("index:{}", config.index_name());
        let priority = app_config.indexing.priority;
        let batch_size = app_config.indexing.batch_size;

        Ok(Arc::new_cyclic(|manager: &Weak<Self>| Self {
            worker: Arc::new(IndexingWorker {
                name: worker_name,
                priority,
                manager: manager.clone(),
            }),
            config,
            lifecycle,
            writer,
            translator,
            core,
            store,
            cluster,
            coordinator,
            work_manager,
            batch_size,
        }))
    }

    pub fn config(&self) -> &EntityIndexConfig<E> {
        &self.config
    }

    pub fn index_name(&self) -> &str {
        self.config.index_name()
    }

    pub fn lifecycle(&self) -> &Arc<IndexLifecycle> {
        &self.lifecycle
    }

    pub fn write_serializer(&self) -> &WriteSerializer {
        &self.writer
    }

    /// Name the indexing worker is registered under with the work manager
    pub fn worker_name(&self) -> &str {
        self.worker.name()
    }

    /// Validate or rebuild the index, open the reader and queue a catch-up scan
    pub fn on_started(&self) -> SearchResult<()> {
        self.lifecycle.start(&self.writer)?;
        self.submit(IndexWork::Scan);
        info!(index = %self.index_name(), "Text index started");
        Ok(())
    }

    pub fn on_stopping(&self) {
        self.lifecycle.stop();
    }

    /// Queue a reindex of `entity`
    pub fn request_index(&self, entity: &E) {
        self.submit(IndexWork::Entity(entity.id()));
    }

    pub fn request_index_ids(&self, entity_ids: &[EntityId]) {
        for entity_id in entity_ids {
            self.submit(IndexWork::Entity(*entity_id));
        }
    }

    /// Remove entity documents from the local index
    pub fn delete_entities(&self, entity_ids: &[EntityId]) -> SearchResult<()> {
        self.writer.with_writer(|tx| {
            for entity_id in entity_ids {
                tx.delete_entity(*entity_id);
            }
            Ok(())
        })?;
        SEARCH_METRICS.record_deleted(self.index_name(), entity_ids.len());
        debug!(index = %self.index_name(), count = entity_ids.len(), "Deleted entities");
        Ok(())
    }

    /// Remove every document of a deleted project on every node
    pub async fn on_project_deleted(&self, project_id: ProjectId) -> SearchResult<()> {
        let result = self.coordinator.delete_project(project_id).await;
        info!(
            index = %self.index_name(),
            project_id,
            nodes = result.responses.len(),
            failed = result.failures.len(),
            "Removed project from text index"
        );
        Ok(())
    }

    /// Number of matching entities across the cluster
    pub async fn count(&self, query: &str) -> SearchResult<u64> {
        self.translator.validate(query)?;
        self.coordinator.count(query).await
    }

    /// Matching entities ranked by relevance, `limit` of them starting at `offset`
    pub async fn search(&self, query: &str, offset: usize, limit: usize) -> SearchResult<Vec<E>> {
        self.translator.validate(query)?;
        let ranked = self.coordinator.search(query, offset, limit).await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }
        let entities = self.store.query_ids(&ranked).await?;
        Ok(order_by_rank(&ranked, entities))
    }

    pub fn stats(&self) -> SearchResult<IndexStats> {
        self.lifecycle.stats()
    }

    /// Index document for `entity`
    pub fn document_for(&self, entity: &E) -> EntityDocument {
        let mut builder = DocumentBuilder::new(self.lifecycle.schema());
        self.config.extract(entity, &mut builder);
        EntityDocument::new(&self.core, entity.id(), entity.project_id(), builder.into_document())
    }

    fn submit(&self, work: IndexWork) {
        if let Err(e) = self.work_manager.submit(&self.worker, work) {
            warn!(
                index = %self.index_name(),
                work = ?work,
                error = %e,
                "Failed to queue index work"
            );
        }
    }

    async fn do_works(&self, works: Vec<IndexWork>) -> SearchResult<()> {
        let mut entity_ids: Vec<EntityId> = works
            .iter()
            .filter_map(|work| match work {
                IndexWork::Entity(entity_id) => Some(*entity_id),
                IndexWork::Scan => None,
            })
            .collect();
        entity_ids.sort_unstable();
        entity_ids.dedup();

        if !entity_ids.is_empty() {
            self.index_entities(&entity_ids).await?;
        }

        if works.contains(&IndexWork::Scan) {
            while self.scan_batch().await? {}
        }

        debug!(index = %self.index_name(), works = works.len(), "Processed index works");
        Ok(())
    }

    async fn index_entities(&self, entity_ids: &[EntityId]) -> SearchResult<()> {
        let mut documents = Vec::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            match self.store.load(*entity_id).await? {
                Some(entity) => documents.push(self.document_for(&entity)),
                None => debug!(index = %self.index_name(), entity_id, "Entity gone, skipping"),
            }
        }

        let indexed = documents.len();
        self.writer.with_writer(|tx| {
            for document in documents {
                tx.upsert(document)?;
            }
            Ok(())
        })?;
        SEARCH_METRICS.record_indexed(self.index_name(), indexed);
        Ok(())
    }

    /// Index the next batch after the progress mark; `true` while more may follow
    async fn scan_batch(&self) -> SearchResult<bool> {
        let mark = self.lifecycle.read_progress_mark()?;
        let batch = self.store.query_after(mark, self.batch_size).await?;
        let Some(last) = batch.iter().map(|entity| entity.id()).max() else {
            return Ok(false);
        };

        let local = self.cluster.local_server();
        let mut owners: HashMap<ProjectId, bool> = HashMap::new();
        let mut documents = Vec::new();
        for entity in &batch {
            let project_id = entity.project_id();
            let owned = match owners.get(&project_id) {
                Some(owned) => *owned,
                None => {
                    let owner = self.cluster.active_server(project_id).await;
                    let owned = owner.as_ref() == Some(&local);
                    owners.insert(project_id, owned);
                    owned
                }
            };
            if owned {
                documents.push(self.document_for(entity));
            }
        }

        let indexed = documents.len();
        self.writer.with_writer(|tx| {
            for document in documents {
                tx.upsert(document)?;
            }
            tx.put_progress_mark(last)
        })?;

        SEARCH_METRICS.record_indexed(self.index_name(), indexed);
        SEARCH_METRICS.record_scan_batch(self.index_name(), last);
        debug!(
            index = %self.index_name(),
            fetched = batch.len(),
            indexed,
            progress_mark = last,
            "Committed scan batch"
        );
        Ok(batch.len() >= self.batch_size)
    }
}

impl<E: ProjectEntity> LocalTextIndex for ProjectTextManager<E> {
    fn index_name(&self) -> &str {
        self.config.index_name()
    }

    fn local_count(&self, query: &str) -> SearchResult<u64> {
        let Some(searcher) = self.lifecycle.searcher() else {
            return Ok(0);
        };
        let query = self.translator.translate(query)?;
        let count = searcher
            .search(&*query, &Count)
            .map_err(|e| SearchError::SearchFailed(e.to_string()))?;
        Ok(count as u64)
    }

    fn local_search(&self, query: &str, limit: usize) -> SearchResult<HashMap<EntityId, f32>> {
        let mut scores = HashMap::new();
        let Some(searcher) = self.lifecycle.searcher() else {
            return Ok(scores);
        };
        if limit == 0 {
            return Ok(scores);
        }

        // TopDocs preallocates for the whole limit
        let available = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
        let limit = limit.min(available).max(1);
        let query = self.translator.translate(query)?;
        let top_docs = searcher
            .search(&*query, &TopDocs::with_limit(limit))
            .map_err(|e| SearchError::SearchFailed(e.to_string()))?;
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(entity_id) = stored_u64(&doc, self.core.entity_id) {
                scores.insert(entity_id, score);
            }
        }
        Ok(scores)
    }

    fn local_delete_project(&self, project_id: ProjectId) -> SearchResult<()> {
        self.writer.with_writer(|tx| {
            tx.delete_project(project_id);
            Ok(())
        })?;
        debug!(index = %self.index_name(), project_id, "Deleted project documents");
        Ok(())
    }
}

struct IndexingWorker<E: ProjectEntity> {
    name: String,
    priority: u32,
    manager: Weak<ProjectTextManager<E>>,
}

#[async_trait]
impl<E: ProjectEntity> BatchWorker for IndexingWorker<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn do_works(&self, works: Vec<IndexWork>) -> SchedulerResult<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.do_works(works).await.map_err(Into::into),
            None => Ok(()),
        }
    }
}
