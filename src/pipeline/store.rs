use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::blueprint::{Blueprint, CompletionState, SanitizeSummary};

use super::builder::SideTask;

/// Persistence failures surfaced by a [`BlueprintStore`].
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    #[diagnostic(code(flowsmith::store::backend))]
    Backend(String),

    #[error("serialization failure")]
    #[diagnostic(code(flowsmith::store::serde))]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Record written alongside a persisted rebuild.
#[derive(Clone, Debug, PartialEq)]
pub struct RebuildAudit {
    pub run_id: String,
    pub triggering_message_id: String,
    pub step_count: usize,
    /// Free-text blueprint summary, as authored by the builder.
    pub summary: Option<String>,
    /// What the sanitizer had to repair before the candidate was accepted.
    pub sanitize_summary: SanitizeSummary,
    /// Follow-up work the builder surfaced but left out of the graph.
    pub side_tasks: Vec<SideTask>,
    pub completion_state: CompletionState,
    pub finished_at: DateTime<Utc>,
}

/// Persistence seam for blueprints and the conversation head used for
/// staleness checks.
#[async_trait]
pub trait BlueprintStore: Send + Sync {
    /// Current persisted blueprint for a graph, if any.
    async fn load(&self, target_graph_id: &str) -> Result<Option<Blueprint>, StoreError>;

    /// Id of the newest conversation message for a graph. `None` when no
    /// conversation exists, in which case no job can be stale.
    async fn latest_message_id(&self, target_graph_id: &str) -> Result<Option<String>, StoreError>;

    /// Atomically persist a rebuilt blueprint with its audit record.
    async fn save_rebuild(
        &self,
        target_graph_id: &str,
        blueprint: &Blueprint,
        audit: &RebuildAudit,
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
struct InMemoryInner {
    blueprints: FxHashMap<String, Blueprint>,
    latest_message: FxHashMap<String, String>,
    audits: Vec<RebuildAudit>,
}

/// Map-backed store for tests and single-process use.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a blueprint as the persisted state for a graph.
    pub fn seed_blueprint(&self, target_graph_id: impl Into<String>, blueprint: Blueprint) {
        self.inner
            .lock()
            .expect("in-memory store lock poisoned")
            .blueprints
            .insert(target_graph_id.into(), blueprint);
    }

    /// Advance the conversation head for a graph.
    pub fn record_message(
        &self,
        target_graph_id: impl Into<String>,
        message_id: impl Into<String>,
    ) {
        self.inner
            .lock()
            .expect("in-memory store lock poisoned")
            .latest_message
            .insert(target_graph_id.into(), message_id.into());
    }

    /// All audits written so far, in write order.
    pub fn audits(&self) -> Vec<RebuildAudit> {
        self.inner
            .lock()
            .expect("in-memory store lock poisoned")
            .audits
            .clone()
    }
}

#[async_trait]
impl BlueprintStore for InMemoryStore {
    async fn load(&self, target_graph_id: &str) -> Result<Option<Blueprint>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("in-memory store lock poisoned")
            .blueprints
            .get(target_graph_id)
            .cloned())
    }

    async fn latest_message_id(&self, target_graph_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("in-memory store lock poisoned")
            .latest_message
            .get(target_graph_id)
            .cloned())
    }

    async fn save_rebuild(
        &self,
        target_graph_id: &str,
        blueprint: &Blueprint,
        audit: &RebuildAudit,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("in-memory store lock poisoned");
        inner
            .blueprints
            .insert(target_graph_id.to_owned(), blueprint.clone());
        inner.audits.push(audit.clone());
        Ok(())
    }
}
