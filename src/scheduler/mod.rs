//! Background batch scheduling for index maintenance
//!
//! Indexing never runs on the request path. Callers submit [`IndexWork`] to a
//! named [`BatchWorker`]; the [`BatchWorkManager`] collapses duplicate work in
//! the worker's pending set and drains it in batches on a fixed pool of tokio
//! tasks.
//!
//! # Guarantees
//!
//! - **Deduplication**: repeated submissions of the same work before the
//!   next drain run once
//! - **No overlap**: a worker never runs two batches at the same time
//! - **Priority**: ready workers are served by ascending priority value, then
//!   in the order they became ready
//! - **Isolation**: a failing or panicking batch is logged and counted, never
//!   retried, and never takes a pool task down
//!
//! # Example
//!
//! ```no_run
//! use project_text_index::scheduler::{BatchWorkManager, BatchWorker, IndexWork, SchedulerResult};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl BatchWorker for Printer {
//!     fn name(&self) -> &str { "printer" }
//!     fn priority(&self) -> u32 { 20 }
//!     async fn do_works(&self, works: Vec<IndexWork>) -> SchedulerResult<()> {
//!         println!("{:?}", works);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = BatchWorkManager::new(2);
//!     let worker: Arc<dyn BatchWorker> = Arc::new(Printer);
//!     manager.submit(&worker, IndexWork::Scan);
//!     manager.wait_until_idle().await;
//!     manager.shutdown().await;
//! }
//! ```

mod error;
mod metrics;
mod pool;
mod work;

pub use error::{SchedulerError, SchedulerResult};
pub use metrics::{init_scheduler_metrics, SCHEDULER_METRICS};
pub use pool::BatchWorkManager;
pub use work::{BatchWorker, IndexWork};
