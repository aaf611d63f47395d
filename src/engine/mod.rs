//! Dispatch engine: ingestion, the worker pool, and the lifecycle that ties
//! them to the feed and to shutdown.

pub mod inflight;
pub mod ingest;
pub mod lifecycle;
pub mod pool;

pub use inflight::Inflight;
pub use ingest::{IngestOutcome, Ingestor};
pub use lifecycle::{Coordinator, Interrupts, LifecycleConfig, Phase, Shutdown, ShutdownKind};
pub use pool::{DrainOutcome, WorkerPool};
