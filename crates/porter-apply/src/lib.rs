//! Porter Apply - resumable plan execution
//!
//! Runs a validated [`Plan`](porter_plan::Plan) against a target platform:
//! - Dependency-gated dispatch over a bounded worker pool
//! - Retry with exponential backoff and jitter
//! - Rate-limit budget gating
//! - A checkpoint after every success, so an interrupted run resumes
//! - Progress events and a per-action report
//!
//! # Example
//!
//! ```rust
//! use porter_apply::{ApplyEngine, ApplyOutcome, InMemoryTarget, MemoryCheckpointStore};
//! use porter_core::{Entity, EntityCatalog, EntityType};
//! use porter_plan::PlanGenerator;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # block_on(async {
//! let catalog = EntityCatalog::new(
//!     "gitlab:group/app",
//!     vec![
//!         Entity::new(EntityType::Repository, "app", json!({"name": "app"})),
//!         Entity::new(EntityType::Label, "bug", json!({"name": "bug"})),
//!     ],
//! )?;
//! let plan = PlanGenerator::new().generate(&catalog)?;
//! let engine = ApplyEngine::new(
//!     plan,
//!     Arc::new(InMemoryTarget::new()),
//!     Arc::new(MemoryCheckpointStore::new()),
//! );
//! let report = engine.run().await?;
//! assert_eq!(report.outcome, ApplyOutcome::Complete);
//! assert_eq!(report.id_map.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! # fn block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod inputs;
pub mod memory;
pub mod report;
pub mod retry;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use client::{ApiResponse, RateLimitStatus, TargetClient};
pub use config::ApplyConfig;
pub use context::{ExecutionContext, IdMap, RateBudget};
pub use engine::{ApplyEngine, CancelHandle};
pub use error::{ApiError, ApplyError, CheckpointError, ExecutionError};
pub use events::{ChannelSink, NullSink, ProgressEvent, ProgressSink, RecordingSink, TracingSink};
pub use executor::{ActionExecutor, ExecutionResult, ExecutorRegistry, ResourceExecutor, WriteMode};
pub use inputs::UserInputs;
pub use memory::{CallRecord, Fault, InMemoryTarget, Operation};
pub use report::{ActionReport, ApplyOutcome, ApplyReport, ReportSummary};
pub use retry::RetryPolicy;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
