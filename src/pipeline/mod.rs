//! Async rebuild pipeline: queue, single worker, and persistence seams.
//!
//! A chat message that asks for a blueprint change becomes a [`BuildJob`] on
//! the [`BuildQueue`]. The [`BuildWorker`] drains the queue one job at a
//! time: it first checks whether a newer message has superseded the job,
//! then drives the pluggable [`BlueprintBuilder`] while relaying its
//! progress through the activity bus, sanitizes and numbers the candidate
//! graph, and persists the result through the [`BlueprintStore`] seam.
//! Transient builder failures are retried with exponential backoff inside a
//! small attempt budget; everything else ends the run with a user-safe
//! error event.

mod builder;
mod config;
mod queue;
mod store;
mod worker;

pub use builder::{
    BlueprintBuilder, BuildOutput, BuildRequest, BuilderError, ProgressSink, SideTask,
};
pub use config::{MIN_REPLAY_CAPACITY, PipelineConfig};
pub use queue::{BuildJob, BuildPayload, BuildQueue, QueueError};
pub use store::{BlueprintStore, InMemoryStore, RebuildAudit, StoreError};
pub use worker::{BuildWorker, PipelineError, RunOutcome};
