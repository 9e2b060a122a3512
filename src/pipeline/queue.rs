use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Payload carried by a rebuild job: the triggering message and its context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPayload {
    pub change_request: String,
    pub conversation: Vec<String>,
}

impl BuildPayload {
    pub fn new(change_request: impl Into<String>) -> Self {
        Self {
            change_request: change_request.into(),
            conversation: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_conversation(mut self, conversation: Vec<String>) -> Self {
        self.conversation = conversation;
        self
    }
}

/// One queued rebuild. `run_id` names the activity channel for the run;
/// `attempts_made` counts completed builder attempts and stays stable across
/// re-enqueues of the same run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJob {
    pub target_graph_id: String,
    pub run_id: String,
    pub triggering_message_id: String,
    pub payload: BuildPayload,
    pub attempts_made: u32,
}

impl BuildJob {
    /// New job with a freshly generated run id.
    pub fn new(
        target_graph_id: impl Into<String>,
        triggering_message_id: impl Into<String>,
        payload: BuildPayload,
    ) -> Self {
        Self {
            target_graph_id: target_graph_id.into(),
            run_id: Uuid::new_v4().to_string(),
            triggering_message_id: triggering_message_id.into(),
            payload,
            attempts_made: 0,
        }
    }

    /// Override the generated run id, mainly for tests and replays.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    /// Job rejected before it ever reaches a worker.
    #[error("malformed job payload: {0}")]
    #[diagnostic(
        code(flowsmith::queue::malformed),
        help("Jobs need a target graph, a triggering message id, and a non-empty change request.")
    )]
    MalformedPayload(&'static str),

    /// All receivers are gone; the worker has shut down.
    #[error("build queue closed")]
    #[diagnostic(code(flowsmith::queue::closed))]
    Closed,
}

/// Unbounded MPMC queue of rebuild jobs.
///
/// Validation happens at enqueue time so a malformed request fails fast in
/// the caller instead of inside the worker loop.
#[derive(Clone)]
pub struct BuildQueue {
    tx: flume::Sender<BuildJob>,
    rx: flume::Receiver<BuildJob>,
}

impl Default for BuildQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn enqueue(&self, job: BuildJob) -> Result<(), QueueError> {
        if job.target_graph_id.trim().is_empty() {
            return Err(QueueError::MalformedPayload("empty target graph id"));
        }
        if job.triggering_message_id.trim().is_empty() {
            return Err(QueueError::MalformedPayload("empty triggering message id"));
        }
        if job.payload.change_request.trim().is_empty() {
            return Err(QueueError::MalformedPayload("empty change request"));
        }
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }

    /// Sender half, for delayed re-enqueue tasks.
    pub fn sender(&self) -> flume::Sender<BuildJob> {
        self.tx.clone()
    }

    /// Receiver half, consumed by the worker.
    pub fn receiver(&self) -> flume::Receiver<BuildJob> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
