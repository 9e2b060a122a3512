mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FailingStore, ScriptedBuilder, decision_blueprint, misparented_fanout_blueprint};
use flowsmith::activity::{
    ActivityBus, ActivityStatus, RawSignal, STAGE_GENERATE, STAGE_SUPERSEDED,
};
use flowsmith::blueprint::Blueprint;
use flowsmith::pipeline::{
    BlueprintStore, BuildJob, BuildPayload, BuildQueue, BuildWorker, InMemoryStore, PipelineConfig,
    QueueError, RunOutcome, SideTask,
};

const GRAPH: &str = "graph-1";

fn fast_config() -> PipelineConfig {
    PipelineConfig::default().with_backoff_base(Duration::from_millis(5))
}

fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.seed_blueprint(GRAPH, decision_blueprint());
    store
}

fn worker_for(
    queue: &BuildQueue,
    builder: Arc<ScriptedBuilder>,
    store: Arc<dyn BlueprintStore>,
) -> (BuildWorker, Arc<ActivityBus>) {
    let bus = Arc::new(ActivityBus::default());
    let worker = BuildWorker::new(queue, builder, store, Arc::clone(&bus), fast_config());
    (worker, bus)
}

fn job(message_id: &str) -> BuildJob {
    BuildJob::new(GRAPH, message_id, BuildPayload::new("add an approval step"))
        .with_run_id(format!("run-{message_id}"))
}

#[tokio::test]
async fn successful_run_sanitizes_numbers_and_persists() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(misparented_fanout_blueprint()));
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(builder.calls(), 1);

    // The persisted graph is repaired and numbered.
    let saved = store.load(GRAPH).await.unwrap().expect("blueprint saved");
    assert_eq!(saved.step("extract").unwrap().next_step_ids, vec!["gate"]);
    assert!(saved.steps.iter().all(|s| s.step_number.is_some()));
    assert_eq!(saved.branches.len(), 2);

    let audits = store.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].run_id, "run-m1");
    assert_eq!(audits[0].triggering_message_id, "m1");
    assert_eq!(audits[0].step_count, saved.step_count());
    // The audit records what the sanitizer had to repair.
    assert!(audits[0].sanitize_summary.branches_reparented >= 2);
    assert!(audits[0].sanitize_summary.start_resolved);

    // The run narrative ends with a terminal finalize event carrying the
    // repair counts.
    let snapshot = bus.snapshot("run-m1");
    let last = snapshot.last_event.expect("events published");
    assert_eq!(last.status, ActivityStatus::Done);
    assert_eq!(last.stage, "finalize");
    let detail = last.detail.as_deref().expect("finalize detail present");
    assert!(detail.contains("repairs"), "detail was {detail:?}");
}

#[tokio::test]
async fn stale_job_is_superseded_without_building_or_writing() {
    let store = seeded_store();
    store.record_message(GRAPH, "m2");
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(decision_blueprint()));
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Superseded);

    // No builder call, no write.
    assert_eq!(builder.calls(), 0);
    assert!(store.audits().is_empty());

    // Exactly one event: a terminal superseded notice with a pointer forward.
    let snapshot = bus.snapshot("run-m1");
    assert_eq!(snapshot.events.len(), 1);
    let event = &snapshot.events[0];
    assert_eq!(event.stage, STAGE_SUPERSEDED);
    assert_eq!(event.status, ActivityStatus::Done);
    assert!(event.cta.is_some());
}

#[tokio::test]
async fn missing_conversation_head_never_supersedes() {
    let store = seeded_store();
    // No message recorded: latest_message_id is None.
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(decision_blueprint()));
    let queue = BuildQueue::new();
    let (worker, _) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(builder.calls(), 1);
}

#[tokio::test]
async fn transient_failure_reenqueues_with_backoff() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(
        ScriptedBuilder::new()
            .then_fail_transient("upstream hiccup")
            .then_succeed(decision_blueprint()),
    );
    let queue = BuildQueue::new();
    let (worker, _) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Retrying);

    // The delayed retry lands back on the queue with its attempt recorded.
    let retried = tokio::time::timeout(Duration::from_secs(2), queue.receiver().recv_async())
        .await
        .expect("retry scheduled in time")
        .expect("queue open");
    assert_eq!(retried.attempts_made, 1);
    assert_eq!(retried.run_id, "run-m1");

    let outcome = worker.process(retried).await;
    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(builder.calls(), 2);
    assert_eq!(store.audits().len(), 1);
}

#[tokio::test]
async fn retry_attempt_does_not_replay_finished_stages() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(
        ScriptedBuilder::new()
            .then_fail_transient("upstream hiccup")
            .then_succeed(decision_blueprint()),
    );
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    assert_eq!(worker.process(job("m1")).await, RunOutcome::Retrying);
    let retried = tokio::time::timeout(Duration::from_secs(2), queue.receiver().recv_async())
        .await
        .expect("retry scheduled in time")
        .expect("queue open");
    assert_eq!(worker.process(retried).await, RunOutcome::Succeeded);

    // Across both attempts the prepare stage tells its story exactly once:
    // the second attempt must not reopen a stage the first already finished.
    let snapshot = bus.snapshot("run-m1");
    let prepare: Vec<_> = snapshot
        .events
        .iter()
        .filter(|e| e.stage == "prepare")
        .collect();
    assert_eq!(prepare.len(), 2, "prepare milestones were replayed");
    assert_eq!(prepare[0].status, ActivityStatus::Running);
    assert_eq!(prepare[1].status, ActivityStatus::Done);
}

#[tokio::test]
async fn side_tasks_land_in_the_audit_and_the_done_event() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let tasks = vec![SideTask {
        title: "Email legal about the new retention step".to_string(),
        assignee: Some("ops".to_string()),
    }];
    let builder = Arc::new(
        ScriptedBuilder::new().then_succeed_with_tasks(decision_blueprint(), tasks.clone()),
    );
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, builder, Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Succeeded);

    let audits = store.audits();
    assert_eq!(audits[0].side_tasks, tasks);

    let last = bus.snapshot("run-m1").last_event.expect("done published");
    let detail = last.detail.as_deref().unwrap_or_default();
    assert!(detail.contains("1 follow-up task"), "detail was {detail:?}");
}

#[tokio::test]
async fn exhausted_retry_budget_fails_with_safe_message() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(ScriptedBuilder::new().then_fail_transient("secret internal detail"));
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let mut last_attempt = job("m1");
    last_attempt.attempts_made = 1;
    let outcome = worker.process(last_attempt).await;
    assert_eq!(outcome, RunOutcome::Failed);
    assert!(queue.is_empty());

    let snapshot = bus.snapshot("run-m1");
    let last = snapshot.last_event.expect("error event published");
    assert_eq!(last.status, ActivityStatus::Error);
    assert_eq!(last.stage, STAGE_GENERATE);
    // Raw builder detail never reaches subscribers.
    assert!(!last.title.contains("secret internal detail"));
}

#[tokio::test]
async fn terminal_builder_failure_never_retries() {
    let store = seeded_store();
    let builder = Arc::new(ScriptedBuilder::new().then_fail_terminal("refused"));
    let queue = BuildQueue::new();
    let (worker, _) = worker_for(&queue, Arc::clone(&builder), Arc::new(store));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Failed);
    assert!(queue.is_empty());
    assert_eq!(builder.calls(), 1);
}

#[tokio::test]
async fn unknown_graph_fails_in_prepare() {
    let store = InMemoryStore::new();
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(decision_blueprint()));
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(builder.calls(), 0);
    assert!(store.audits().is_empty());

    let last = bus.snapshot("run-m1").last_event.expect("error published");
    assert_eq!(last.status, ActivityStatus::Error);
    assert_eq!(last.stage, "prepare");
}

#[tokio::test]
async fn empty_candidate_is_rejected_before_persisting() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(Blueprint::new("empty")));
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Failed);
    assert!(store.audits().is_empty());

    let last = bus.snapshot("run-m1").last_event.expect("error published");
    assert_eq!(last.status, ActivityStatus::Error);
    assert_eq!(last.stage, "finalize");
}

#[tokio::test]
async fn persistence_failure_surfaces_a_safe_error() {
    let store = FailingStore::new(seeded_store());
    store.inner.record_message(GRAPH, "m1");
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(decision_blueprint()));
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, builder, Arc::new(store));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Failed);

    let last = bus.snapshot("run-m1").last_event.expect("error published");
    assert_eq!(last.status, ActivityStatus::Error);
    assert!(!last.title.contains("disk on fire"));
}

#[tokio::test]
async fn builder_signals_flow_through_the_run_channel() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(
        ScriptedBuilder::new()
            .then_succeed(decision_blueprint())
            .with_signals(vec![
                RawSignal::running(STAGE_GENERATE, "Drafting steps"),
                RawSignal::message(STAGE_GENERATE, "Reviewing branches"),
            ]),
    );
    let queue = BuildQueue::new();
    let (worker, bus) = worker_for(&queue, builder, Arc::new(store));

    let outcome = worker.process(job("m1")).await;
    assert_eq!(outcome, RunOutcome::Succeeded);

    let snapshot = bus.snapshot("run-m1");
    let titles: Vec<&str> = snapshot.events.iter().map(|e| e.title.as_str()).collect();
    assert!(titles.contains(&"Drafting steps"));
    assert!(titles.contains(&"Reviewing branches"));

    // Events arrive strictly ordered by seq.
    let seqs: Vec<u64> = snapshot.events.iter().map(|e| e.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
}

#[tokio::test]
async fn worker_loop_drains_queued_jobs() {
    let store = seeded_store();
    store.record_message(GRAPH, "m1");
    let builder = Arc::new(ScriptedBuilder::new().then_succeed(decision_blueprint()));
    let queue = BuildQueue::new();
    let (worker, _) = worker_for(&queue, Arc::clone(&builder), Arc::new(store.clone()));

    queue.enqueue(job("m1")).unwrap();
    let handle = tokio::spawn(async move { worker.run().await });

    // Poll until the audit lands rather than guessing a sleep.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while store.audits().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.audits().len(), 1);
    handle.abort();
}

#[test]
fn queue_rejects_malformed_jobs() {
    let queue = BuildQueue::new();
    let blank = BuildJob::new(GRAPH, "m1", BuildPayload::new("   "));
    assert!(matches!(
        queue.enqueue(blank),
        Err(QueueError::MalformedPayload(_))
    ));

    let no_graph = BuildJob::new("", "m1", BuildPayload::new("do things"));
    assert!(matches!(
        queue.enqueue(no_graph),
        Err(QueueError::MalformedPayload(_))
    ));

    assert!(queue.is_empty());
    queue
        .enqueue(BuildJob::new(GRAPH, "m1", BuildPayload::new("do things")))
        .unwrap();
    assert_eq!(queue.len(), 1);
}
