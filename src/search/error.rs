//! Error types for search operations

use crate::cluster::ClusterError;
use crate::error::AppError;
use crate::scheduler::SchedulerError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during index and search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Index initialization failed
    #[error("Index initialization failed: {0}")]
    IndexInitFailed(String),

    /// Query string could not be understood
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// Document indexing failed
    #[error("Document indexing failed: {0}")]
    IndexingFailed(String),

    /// Document deletion failed
    #[error("Document deletion failed: {0}")]
    DeletionFailed(String),

    /// Schema error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    TantivyError(String),

    /// Entity store error
    #[error("Entity store error: {0}")]
    Store(String),

    /// Cluster error
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::TantivyError(err.to_string())
    }
}

impl From<AppError> for SearchError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Configuration(msg) => SearchError::InvalidConfiguration(msg),
            AppError::Io(err) => SearchError::IoError(err),
            other => SearchError::Store(other.to_string()),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidConfiguration(msg) => AppError::Configuration(msg),
            SearchError::InvalidQuery(msg) => AppError::Validation(msg),
            SearchError::IoError(err) => AppError::Io(err),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<SearchError> for SchedulerError {
    fn from(err: SearchError) -> Self {
        SchedulerError::BatchFailed(err.to_string())
    }
}

impl From<SearchError> for ClusterError {
    fn from(err: SearchError) -> Self {
        ClusterError::TaskFailed(err.to_string())
    }
}
