//! Per-run state machine that throttles raw progress chatter into a bounded,
//! user-facing event stream.
//!
//! The external builder reports progress freely; a run would otherwise emit
//! dozens of near-identical events. The normalizer guarantees a short
//! narrative: one `running` event per stage, at most [`MAX_STAGE_UPDATES`]
//! further updates per stage, at most [`MAX_EVENTS_PER_RUN`] non-terminal
//! events per run, and a terminal `done`/`error` that is never suppressed by
//! either budget. Once a stage is done, nothing more is emitted for it,
//! including terminal-looking repeats.

use rustc_hash::FxHashMap;

use super::event::{ActivityEvent, ActivityStatus};

/// Non-terminal updates allowed per stage after its first signal.
pub const MAX_STAGE_UPDATES: usize = 1;
/// Non-terminal emissions allowed across one whole run.
pub const MAX_EVENTS_PER_RUN: usize = 14;

/// A raw progress signal as reported by the builder or the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSignal {
    pub stage: String,
    pub status: ActivityStatus,
    pub title: String,
    pub detail: Option<String>,
    pub progress: Option<u8>,
    pub cta: Option<String>,
}

impl RawSignal {
    pub fn new(
        stage: impl Into<String>,
        status: ActivityStatus,
        title: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            status,
            title: title.into(),
            detail: None,
            progress: None,
            cta: None,
        }
    }

    /// Free-text progress chatter within a stage.
    pub fn message(stage: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(stage, ActivityStatus::Running, text)
    }

    pub fn running(stage: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(stage, ActivityStatus::Running, title)
    }

    pub fn done(stage: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(stage, ActivityStatus::Done, title)
    }

    pub fn error(stage: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(stage, ActivityStatus::Error, title)
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
}

#[derive(Debug, Default)]
struct StageTrack {
    started: bool,
    done: bool,
    updates: usize,
}

/// Per-run normalizer; create one per rebuild attempt and drop it with the
/// run (the bus owns run-lifetime state, not a process-wide singleton).
#[derive(Debug)]
pub struct ActivityNormalizer {
    run_id: String,
    stages: FxHashMap<String, StageTrack>,
    non_terminal_emitted: usize,
}

impl ActivityNormalizer {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            stages: FxHashMap::default(),
            non_terminal_emitted: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Classify one raw signal. Returns the event to publish, or `None` when
    /// the signal is swallowed by a budget or the stage is already done.
    pub fn observe(&mut self, signal: RawSignal) -> Option<ActivityEvent> {
        let track = self.stages.entry(signal.stage.clone()).or_default();

        if track.done {
            tracing::debug!(
                run = %self.run_id,
                stage = %signal.stage,
                "signal for completed stage swallowed"
            );
            return None;
        }

        if signal.status.is_terminal() {
            track.done = true;
            return Some(self.event_from(signal));
        }

        // Non-terminal path: per-stage and per-run budgets apply.
        if track.started {
            if track.updates >= MAX_STAGE_UPDATES {
                return None;
            }
            if self.non_terminal_emitted >= MAX_EVENTS_PER_RUN {
                return None;
            }
            track.updates += 1;
        } else {
            track.started = true;
            if self.non_terminal_emitted >= MAX_EVENTS_PER_RUN {
                return None;
            }
        }
        self.non_terminal_emitted += 1;
        Some(self.event_from(signal))
    }

    fn event_from(&self, signal: RawSignal) -> ActivityEvent {
        let mut event = ActivityEvent::new(
            self.run_id.clone(),
            signal.stage,
            signal.status,
            signal.title,
        );
        event.detail = signal.detail;
        event.progress = signal.progress.map(|p| p.min(100));
        event.cta = signal.cta;
        event
    }

    /// Count of non-terminal events emitted so far.
    #[must_use]
    pub fn non_terminal_emitted(&self) -> usize {
        self.non_terminal_emitted
    }
}
