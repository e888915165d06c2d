//! Inference computation for vinfer.
//!
//! This crate provides:
//! - Content fingerprinting for (video, params) pairs
//! - Per-fingerprint computation coordination over the cache store
//! - The inference pipeline abstraction and an external-command pipeline
//! - The service handle used by the HTTP layer
//! - Background cache expiry

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod sweeper;

pub use config::WorkerConfig;
pub use coordinator::{ComputationCoordinator, CoordinatorStats, SubmitOutcome, TicketSnapshot};
pub use error::{WorkerError, WorkerResult};
pub use fingerprint::{fingerprint, fingerprint_file, sniff_container};
pub use logging::{init_tracing, ComputationLogger, LoggingGuard};
pub use pipeline::{CommandPipeline, InferencePipeline, VideoInput};
pub use service::{InferenceService, Processed, Submission};
pub use sweeper::CacheSweeper;
