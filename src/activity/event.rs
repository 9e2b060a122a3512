use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage for the worker's setup milestones (staleness check, graph load).
pub const STAGE_PREPARE: &str = "prepare";
/// Stage for the external builder's own progress signals.
pub const STAGE_GENERATE: &str = "generate";
/// Stage for sanitization, numbering, and persistence.
pub const STAGE_FINALIZE: &str = "finalize";
/// Terminal stage published when a newer request supersedes a run.
pub const STAGE_SUPERSEDED: &str = "superseded";

/// Stage-level status of an [`ActivityEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Running,
    Done,
    Error,
}

impl ActivityStatus {
    /// `done` and `error` end a stage; `running` does not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One unit of user-facing progress for a run.
///
/// `seq` is zero until the event passes through
/// [`ActivityBus::publish`](crate::activity::ActivityBus::publish), which
/// stamps a per-run monotonically increasing value; subscribers order and
/// deduplicate on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub run_id: String,
    pub stage: String,
    pub status: ActivityStatus,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta: Option<String>,
    #[serde(default)]
    pub seq: u64,
    pub at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        status: ActivityStatus,
        title: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage: stage.into(),
            status,
            title: title.into(),
            detail: None,
            progress: None,
            cta: None,
            seq: 0,
            at: Utc::now(),
        }
    }

    pub fn running(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::new(run_id, stage, ActivityStatus::Running, title)
    }

    pub fn done(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::new(run_id, stage, ActivityStatus::Done, title)
    }

    pub fn error(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::new(run_id, stage, ActivityStatus::Error, title)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    #[must_use]
    pub fn with_cta(mut self, cta: impl Into<String>) -> Self {
        self.cta = Some(cta.into());
        self
    }

    /// Stage-terminal: `done` or `error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}#{}] {}/{} {}",
            self.run_id, self.seq, self.stage, self.status, self.title
        )
    }
}

/// Point-in-time state for a run, used to bring a newly attached subscriber
/// up to date before streaming live events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActivityStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<ActivityEvent>,
    /// Bounded buffer of the most recent events, each already stamped with
    /// `seq`.
    #[serde(default)]
    pub events: Vec<ActivityEvent>,
}

impl ActivitySnapshot {
    /// Highest `seq` contained in the snapshot, if any.
    #[must_use]
    pub fn latest_seq(&self) -> Option<u64> {
        self.events.iter().map(|e| e.seq).max()
    }
}
