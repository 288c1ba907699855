//! Per-entity-type full-text indexing and cluster-wide search
//!
//! Each entity type (issues, pull requests, comments, ...) gets its own
//! on-disk tantivy index under `<site_dir>/index/<index_name>`. A
//! [`ProjectTextManager`] keeps that index in sync with the entity store and
//! answers queries by fanning them out to every node of the cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           ProjectTextManager<E>                  │
//! ├─────────────────────────────────────────────────┤
//! │  - request_index()   - delete_entities()        │
//! │  - count()           - search()                 │
//! │  - on_started()      - on_project_deleted()     │
//! └─────────────────────────────────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │  BatchWorkManager    │   │  QueryCoordinator    │
//! │  (catch-up scan,     │   │  (broadcast, merge,  │
//! │   entity reindex)    │   │   rank window)       │
//! └──────────────────────┘   └──────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │  WriteSerializer     │   │  TextIndexRegistry   │
//! │  (commit/rollback)   │   │  (per-node dispatch) │
//! └──────────────────────┘   └──────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌─────────────────────────────────────────────────┐
//! │  IndexLifecycle: version check, reader refresh   │
//! │  Tantivy index: markers + entity documents       │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use project_text_index::cluster::{ClusterTaskHandler, LocalCluster};
//! use project_text_index::config::Config;
//! use project_text_index::models::{EntityId, ProjectEntity, ProjectId};
//! use project_text_index::scheduler::BatchWorkManager;
//! use project_text_index::search::{EntityIndexConfig, ProjectTextManager, TextIndexRegistry};
//! use project_text_index::state::InMemoryEntityStore;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Issue { id: EntityId, project: ProjectId, title: String }
//!
//! impl ProjectEntity for Issue {
//!     fn id(&self) -> EntityId { self.id }
//!     fn project_id(&self) -> ProjectId { self.project }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::with_site_dir("/tmp/site");
//!     let index_config = EntityIndexConfig::<Issue>::builder("Issue", 1)
//!         .text_field("title")
//!         .extractor(|issue, doc| {
//!             doc.add_text("title", &issue.title);
//!         })
//!         .build()?;
//!
//!     let store = Arc::new(InMemoryEntityStore::<Issue>::new());
//!     let node = LocalCluster::standalone("127.0.0.1:5710");
//!     let manager = ProjectTextManager::new(
//!         index_config,
//!         &config,
//!         store,
//!         node.clone(),
//!         BatchWorkManager::from_config(&config.indexing),
//!     )?;
//!
//!     let registry = TextIndexRegistry::new();
//!     registry.register(manager.clone());
//!     let handler: Arc<dyn ClusterTaskHandler> = registry;
//!     node.attach(&handler);
//!
//!     manager.on_started()?;
//!     let hits = manager.search("crash", 0, 20).await?;
//!     println!("{} issues", hits.len());
//!     Ok(())
//! }
//! ```

mod analyzer;
mod config;
mod coordinator;
mod document;
mod error;
mod index;
mod metrics;
mod query;
mod registry;
mod service;
mod writer;

pub use analyzer::{analyze, entity_text_analyzer, register_analyzer, ENTITY_TEXT_TOKENIZER};
pub use config::{
    index_name_for, EntityIndexConfig, EntityIndexConfigBuilder, Extractor, FieldKind, FieldSpec,
};
pub use coordinator::{merge_scores, order_by_rank, rank_window, sum_counts, QueryCoordinator};
pub use document::{
    build_entity_schema, stored_u64, CoreFields, DocKind, DocumentBuilder, EntityDocument,
    FIELD_ENTITY_ID, FIELD_INDEX_VERSION, FIELD_LAST_ENTITY_ID, FIELD_PROJECT_ID, FIELD_TYPE,
    RESERVED_FIELDS,
};
pub use error::{SearchError, SearchResult};
pub use index::{read_marker, IndexLifecycle, IndexStats};
pub use metrics::{init_search_metrics, SEARCH_METRICS};
pub use query::QueryTranslator;
pub use registry::{LocalTextIndex, TextIndexRegistry};
pub use service::ProjectTextManager;
pub use writer::{IndexTransaction, WriteSerializer};
