//! Test doubles for the pipeline seams.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flowsmith::activity::RawSignal;
use flowsmith::blueprint::Blueprint;
use flowsmith::pipeline::{
    BlueprintBuilder, BlueprintStore, BuildOutput, BuildRequest, BuilderError, InMemoryStore,
    ProgressSink, RebuildAudit, SideTask, StoreError,
};

enum Scripted {
    Succeed(BuildOutput),
    FailTransient(String),
    FailTerminal(String),
}

/// Builder that plays back a fixed script, one entry per call, and records
/// how often it was invoked.
#[derive(Default)]
pub struct ScriptedBuilder {
    script: Mutex<VecDeque<Scripted>>,
    signals: Mutex<Vec<RawSignal>>,
    calls: AtomicUsize,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_succeed(self, candidate: Blueprint) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Succeed(BuildOutput::new(candidate)));
        self
    }

    #[must_use]
    pub fn then_succeed_with_tasks(self, candidate: Blueprint, tasks: Vec<SideTask>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Succeed(
                BuildOutput::new(candidate).with_side_tasks(tasks),
            ));
        self
    }

    #[must_use]
    pub fn then_fail_transient(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::FailTransient(message.to_string()));
        self
    }

    #[must_use]
    pub fn then_fail_terminal(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::FailTerminal(message.to_string()));
        self
    }

    /// Raw signals to emit through the progress sink on every call.
    #[must_use]
    pub fn with_signals(self, signals: Vec<RawSignal>) -> Self {
        *self.signals.lock().unwrap() = signals;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlueprintBuilder for ScriptedBuilder {
    async fn build(
        &self,
        _request: BuildRequest,
        progress: ProgressSink,
    ) -> Result<BuildOutput, BuilderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for signal in self.signals.lock().unwrap().iter().cloned() {
            progress.emit(signal);
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Succeed(output)) => Ok(output),
            Some(Scripted::FailTransient(msg)) => Err(BuilderError::transient(msg)),
            Some(Scripted::FailTerminal(msg)) => Err(BuilderError::terminal(msg)),
            None => Err(BuilderError::terminal("script exhausted")),
        }
    }
}

/// Store wrapper whose writes always fail; reads pass through.
#[derive(Clone)]
pub struct FailingStore {
    pub inner: InMemoryStore,
}

impl FailingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BlueprintStore for FailingStore {
    async fn load(&self, target_graph_id: &str) -> Result<Option<Blueprint>, StoreError> {
        self.inner.load(target_graph_id).await
    }

    async fn latest_message_id(&self, target_graph_id: &str) -> Result<Option<String>, StoreError> {
        self.inner.latest_message_id(target_graph_id).await
    }

    async fn save_rebuild(
        &self,
        _target_graph_id: &str,
        _blueprint: &Blueprint,
        _audit: &RebuildAudit,
    ) -> Result<(), StoreError> {
        Err(StoreError::backend("disk on fire"))
    }
}
