use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::activity::{ActivityStatus, RawSignal, STAGE_GENERATE};
use crate::blueprint::Blueprint;

/// Everything a builder needs to propose a new blueprint revision.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    /// Identifier of the graph being rebuilt.
    pub target_graph_id: String,
    /// Current persisted blueprint. May be empty for a fresh graph.
    pub blueprint: Blueprint,
    /// The user message that triggered the rebuild.
    pub change_request: String,
    /// Prior conversation turns, oldest first, for context.
    pub conversation: Vec<String>,
}

/// Follow-up work the builder surfaced but did not fold into the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideTask {
    pub title: String,
    pub assignee: Option<String>,
}

/// A builder's proposal: candidate graph plus surfaced side work.
///
/// The candidate is raw builder output; the worker sanitizes and numbers it
/// before anything is persisted.
#[derive(Clone, Debug)]
pub struct BuildOutput {
    pub candidate: Blueprint,
    pub side_tasks: Vec<SideTask>,
}

impl BuildOutput {
    pub fn new(candidate: Blueprint) -> Self {
        Self {
            candidate,
            side_tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_side_tasks(mut self, side_tasks: Vec<SideTask>) -> Self {
        self.side_tasks = side_tasks;
        self
    }
}

/// Failure modes a [`BlueprintBuilder`] may report.
///
/// The transient/terminal split drives the worker's retry decision; the
/// message text is operator-facing only and never shown to the end user.
#[derive(Debug, Error, Diagnostic)]
pub enum BuilderError {
    /// Worth retrying: rate limits, timeouts, upstream blips.
    #[error("transient builder failure: {0}")]
    #[diagnostic(
        code(flowsmith::builder::transient),
        help("The worker retries these within its attempt budget.")
    )]
    Transient(String),

    /// Not worth retrying: malformed output, refused request.
    #[error("terminal builder failure: {0}")]
    #[diagnostic(code(flowsmith::builder::terminal))]
    Terminal(String),
}

impl BuilderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Handle a builder uses to report progress while it works.
///
/// Signals are raw and unthrottled; the worker routes them through the
/// run's normalizer before they reach subscribers. A builder that emits
/// nothing still produces a coherent run narrative from worker milestones.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    tx: flume::Sender<RawSignal>,
}

impl ProgressSink {
    /// Paired sink and drain for one run.
    pub fn channel() -> (Self, flume::Receiver<RawSignal>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    /// Report a signal. Silently dropped once the run's drain is gone,
    /// which only happens when the run is already over.
    pub fn emit(&self, signal: RawSignal) {
        let _ = self.tx.send(signal);
    }

    /// Shorthand for free-text progress in the generate stage.
    pub fn message(&self, text: impl Into<String>) {
        self.emit(RawSignal::new(
            STAGE_GENERATE,
            ActivityStatus::Running,
            text,
        ));
    }
}

/// Pluggable generation seam: given the current graph and a change request,
/// propose the next revision.
#[async_trait]
pub trait BlueprintBuilder: Send + Sync {
    async fn build(
        &self,
        request: BuildRequest,
        progress: ProgressSink,
    ) -> Result<BuildOutput, BuilderError>;
}
