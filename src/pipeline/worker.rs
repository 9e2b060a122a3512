use std::sync::{Arc, Mutex};

use chrono::Utc;
use miette::Diagnostic;
use rand::Rng;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::activity::{
    ActivityBus, ActivityEvent, ActivityNormalizer, RawSignal, STAGE_FINALIZE, STAGE_GENERATE,
    STAGE_PREPARE, STAGE_SUPERSEDED,
};
use crate::blueprint::{number, sanitize};

use super::builder::{BlueprintBuilder, BuildOutput, BuildRequest, BuilderError, ProgressSink};
use super::config::PipelineConfig;
use super::queue::{BuildJob, BuildQueue};
use super::store::{BlueprintStore, RebuildAudit, StoreError};

/// How a single dequeued job ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Candidate sanitized, numbered, and persisted.
    Succeeded,
    /// A newer message arrived first; nothing was built or written.
    Superseded,
    /// Terminal failure; the run is over and an error event was published.
    Failed,
    /// Transient failure with budget left; the job was re-enqueued.
    Retrying,
}

/// Failures inside one rebuild run.
///
/// Display text is for operators and logs. The end user only ever sees
/// [`user_message`](Self::user_message).
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("no blueprint record for graph {target_graph_id}")]
    #[diagnostic(
        code(flowsmith::pipeline::not_found),
        help("Seed the graph in the store before enqueueing rebuilds for it.")
    )]
    NotFound { target_graph_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("builder returned a candidate with no resolvable start step")]
    #[diagnostic(
        code(flowsmith::pipeline::empty_candidate),
        help("The sanitizer refused the candidate rather than persist an unusable graph.")
    )]
    EmptyCandidate,
}

impl PipelineError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Builder(e) if e.is_transient())
    }

    /// Safe text for the end-user error event. Technical detail stays in
    /// logs and diagnostics.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "This workspace has no blueprint to update yet.",
            Self::Builder(_) => "Blueprint generation failed. Please try again.",
            Self::Store(_) => "The updated blueprint could not be saved.",
            Self::EmptyCandidate => "The rebuilt blueprint came back empty, so nothing was changed.",
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => STAGE_PREPARE,
            Self::Builder(_) => STAGE_GENERATE,
            Self::Store(_) | Self::EmptyCandidate => STAGE_FINALIZE,
        }
    }
}

/// Single-consumer rebuild worker.
///
/// One worker per process drains the queue strictly one job at a time, so
/// two rebuilds of the same graph can never interleave writes.
pub struct BuildWorker {
    jobs: flume::Receiver<BuildJob>,
    retry_tx: flume::Sender<BuildJob>,
    builder: Arc<dyn BlueprintBuilder>,
    store: Arc<dyn BlueprintStore>,
    bus: Arc<ActivityBus>,
    config: PipelineConfig,
    // Keyed by run id; a retry attempt continues the original run's budgets
    // instead of starting a fresh narrative.
    normalizers: Mutex<FxHashMap<String, Arc<Mutex<ActivityNormalizer>>>>,
}

impl BuildWorker {
    pub fn new(
        queue: &BuildQueue,
        builder: Arc<dyn BlueprintBuilder>,
        store: Arc<dyn BlueprintStore>,
        bus: Arc<ActivityBus>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            jobs: queue.receiver(),
            retry_tx: queue.sender(),
            builder,
            store,
            bus,
            config,
            normalizers: Mutex::new(FxHashMap::default()),
        }
    }

    /// Normalizer for a run, shared across its retry attempts so a finished
    /// stage stays finished and the per-run event cap keeps counting.
    fn normalizer_for(&self, run_id: &str) -> Arc<Mutex<ActivityNormalizer>> {
        let mut normalizers = self
            .normalizers
            .lock()
            .expect("worker normalizer lock poisoned");
        Arc::clone(
            normalizers
                .entry(run_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(ActivityNormalizer::new(run_id)))),
        )
    }

    fn forget_run(&self, run_id: &str) {
        self.normalizers
            .lock()
            .expect("worker normalizer lock poisoned")
            .remove(run_id);
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(&self) {
        while let Ok(job) = self.jobs.recv_async().await {
            let run_id = job.run_id.clone();
            let outcome = self.process(job).await;
            tracing::info!(run = %run_id, ?outcome, "rebuild run finished");
            let evicted = self.bus.evict_expired(self.config.eviction_grace);
            if evicted > 0 {
                tracing::debug!(evicted, "expired run channels evicted");
            }
        }
    }

    /// Execute one job end to end and report how it ended.
    pub async fn process(&self, job: BuildJob) -> RunOutcome {
        let run_id = job.run_id.clone();
        let outcome = match self.execute(job).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(run = %run_id, error = %err, "rebuild run failed");
                self.bus
                    .publish(ActivityEvent::error(&run_id, err.stage(), err.user_message()));
                self.bus.complete_run(&run_id);
                RunOutcome::Failed
            }
        };
        if outcome != RunOutcome::Retrying {
            self.forget_run(&run_id);
        }
        outcome
    }

    async fn execute(&self, job: BuildJob) -> Result<RunOutcome, PipelineError> {
        // Staleness gate: a newer message on the same graph supersedes this
        // job before any milestone, builder work, or store write happens.
        let latest = self.store.latest_message_id(&job.target_graph_id).await?;
        if latest
            .as_deref()
            .is_some_and(|id| id != job.triggering_message_id)
        {
            tracing::info!(
                run = %job.run_id,
                graph = %job.target_graph_id,
                "job superseded by a newer message"
            );
            self.bus.publish(
                ActivityEvent::done(
                    &job.run_id,
                    STAGE_SUPERSEDED,
                    "A newer request took over this rebuild",
                )
                .with_cta("Follow the latest rebuild instead"),
            );
            self.bus.complete_run(&job.run_id);
            return Ok(RunOutcome::Superseded);
        }

        let normalizer = self.normalizer_for(&job.run_id);
        self.emit(
            &normalizer,
            RawSignal::running(STAGE_PREPARE, "Checking your request"),
        );

        let current = self
            .store
            .load(&job.target_graph_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                target_graph_id: job.target_graph_id.clone(),
            })?;

        self.emit(
            &normalizer,
            RawSignal::done(STAGE_PREPARE, "Request accepted"),
        );

        // Builder progress flows through the same normalizer as worker
        // milestones, so the per-run budget covers both.
        let (progress, progress_rx) = ProgressSink::channel();
        let pump = tokio::spawn({
            let bus = Arc::clone(&self.bus);
            let normalizer = Arc::clone(&normalizer);
            async move {
                while let Ok(signal) = progress_rx.recv_async().await {
                    let event = normalizer
                        .lock()
                        .expect("activity normalizer lock poisoned")
                        .observe(signal);
                    if let Some(event) = event {
                        bus.publish(event);
                    }
                }
            }
        });

        let request = BuildRequest {
            target_graph_id: job.target_graph_id.clone(),
            blueprint: current,
            change_request: job.payload.change_request.clone(),
            conversation: job.payload.conversation.clone(),
        };
        let built = self.builder.build(request, progress).await;
        // All sink clones are gone once build returns; draining the pump
        // keeps builder signals ordered before the worker's next milestone.
        let _ = pump.await;

        let output = match built {
            Ok(output) => output,
            Err(err) if err.is_transient() => {
                if job.attempts_made + 1 < self.config.max_attempts {
                    self.schedule_retry(&job, &err);
                    return Ok(RunOutcome::Retrying);
                }
                tracing::warn!(
                    run = %job.run_id,
                    attempts = job.attempts_made + 1,
                    "retry budget exhausted"
                );
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        self.emit(&normalizer, RawSignal::done(STAGE_GENERATE, "Draft ready"));
        self.emit(
            &normalizer,
            RawSignal::running(STAGE_FINALIZE, "Tidying up the blueprint"),
        );

        let BuildOutput {
            candidate,
            side_tasks,
        } = output;
        let (candidate, repair) = sanitize(candidate);
        if !repair.start_resolved {
            return Err(PipelineError::EmptyCandidate);
        }
        let blueprint = number(candidate);

        let audit = RebuildAudit {
            run_id: job.run_id.clone(),
            triggering_message_id: job.triggering_message_id.clone(),
            step_count: blueprint.step_count(),
            summary: blueprint.summary.clone(),
            sanitize_summary: repair.clone(),
            side_tasks: side_tasks.clone(),
            completion_state: blueprint.completion_state(),
            finished_at: Utc::now(),
        };
        self.store
            .save_rebuild(&job.target_graph_id, &blueprint, &audit)
            .await?;

        if repair.repaired_anything() {
            tracing::debug!(run = %job.run_id, ?repair, "candidate graph repaired");
        }
        let mut detail = format!(
            "{} steps, {} branches, {} repairs",
            blueprint.step_count(),
            blueprint.branches.len(),
            repair.repair_count()
        );
        if !side_tasks.is_empty() {
            detail.push_str(&format!(", {} follow-up tasks", side_tasks.len()));
        }
        self.emit(
            &normalizer,
            RawSignal::done(STAGE_FINALIZE, "Blueprint updated").with_detail(detail),
        );
        self.bus.complete_run(&job.run_id);
        Ok(RunOutcome::Succeeded)
    }

    /// Re-enqueue after an exponentially growing, jittered delay. The delay
    /// runs on a detached task so the worker can keep draining other jobs.
    fn schedule_retry(&self, job: &BuildJob, err: &BuilderError) {
        let mut retry = job.clone();
        retry.attempts_made += 1;
        let backoff = self.config.backoff_base * 2u32.saturating_pow(job.attempts_made);
        let jitter = std::time::Duration::from_millis(rand::rng().random_range(0..250u64));
        let delay = backoff + jitter;
        tracing::warn!(
            run = %job.run_id,
            attempt = retry.attempts_made,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient builder failure, retrying"
        );
        let tx = self.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(retry).is_err() {
                tracing::warn!("queue closed before a scheduled retry could land");
            }
        });
    }

    fn emit(&self, normalizer: &Mutex<ActivityNormalizer>, signal: RawSignal) {
        let event = normalizer
            .lock()
            .expect("activity normalizer lock poisoned")
            .observe(signal);
        if let Some(event) = event {
            self.bus.publish(event);
        }
    }
}
