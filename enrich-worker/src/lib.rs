//! # enrich-worker
//!
//! The asynchronous enrichment worker runtime: an HTTP task dispatcher
//! that accepts create/execute requests, fans out to rate-limited external
//! providers through a cache → pool → retry substrate, streams paginated
//! authenticated callbacks back to the primary application, and chains
//! dependent generation tasks through terminal callbacks.

pub mod callback;
pub mod jobs;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod task;
pub mod tasks;
pub mod web;

pub use registry::TaskRegistry;
pub use task::{EnrichmentTask, TaskContext, TaskPayload};
pub use web::{router, AppState};
