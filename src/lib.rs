//! Per-entity-type full-text indexing with cluster-wide search
//!
//! Each entity type gets its own local tantivy index, kept in sync with the
//! authoritative entity store by background batch workers. Queries fan out to
//! every node of the cluster and the partial results are merged.

pub mod cluster;
pub mod config;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod search;
pub mod state;

pub use crate::config::Config;
pub use crate::error::{AppError, Result};

use crate::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("Tracing already initialized: {}", e);
    }
}
