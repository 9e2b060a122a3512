//! Core data model for workflow blueprints.
//!
//! The types here carry no behavior beyond structural queries; the
//! [`sanitize`](crate::blueprint::sanitize) and
//! [`number`](crate::blueprint::number) transforms are pure functions over
//! them. All types are serde round-trippable in the camelCase wire shape the
//! client consumes.

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifies a step within a workflow blueprint.
///
/// Unknown kinds round-trip through [`encode`](Self::encode)/
/// [`decode`](Self::decode) as `Custom`, keeping persisted blueprints
/// forward-compatible.
///
/// # Examples
///
/// ```
/// use flowsmith::blueprint::StepKind;
///
/// assert_eq!(StepKind::Decision.encode(), "Decision");
/// assert_eq!(StepKind::decode("Custom:Webhook"), StepKind::Custom("Webhook".into()));
/// assert_eq!(StepKind::decode("Escalation"), StepKind::Custom("Escalation".into()));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Entry point that starts the workflow (e.g. an inbound email).
    Trigger,
    /// Automated unit of work.
    Action,
    /// Fan-out point whose outgoing edges are labeled branches.
    Decision,
    /// Manual step performed by a person.
    Human,
    /// Application-defined kind identified by a free-form string.
    Custom(String),
}

impl StepKind {
    /// Encode a kind into its persisted string form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            StepKind::Trigger => "Trigger".to_string(),
            StepKind::Action => "Action".to_string(),
            StepKind::Decision => "Decision".to_string(),
            StepKind::Human => "Human".to_string(),
            StepKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form, falling back to `Custom` for anything
    /// unrecognized.
    pub fn decode(s: &str) -> Self {
        match s {
            "Trigger" => StepKind::Trigger,
            "Action" => StepKind::Action,
            "Decision" => StepKind::Decision,
            "Human" => StepKind::Human,
            other => {
                if let Some(rest) = other.strip_prefix("Custom:") {
                    StepKind::Custom(rest.to_string())
                } else {
                    StepKind::Custom(other.to_string())
                }
            }
        }
    }

    /// Returns `true` for [`Decision`](Self::Decision) steps.
    #[must_use]
    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Decision)
    }

    /// Returns `true` for [`Trigger`](Self::Trigger) steps.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => write!(f, "{name}"),
            other => write!(f, "{}", other.encode()),
        }
    }
}

/// A node in the workflow graph.
///
/// `next_step_ids` holds the step's own outgoing edges in order.
/// `parent_step_id` is set only for branch children of a `Decision` step and
/// establishes branch ownership; `branch_label`/`branch_condition` describe
/// that branch for the client. `step_number` is derived display state owned
/// by the numberer, never authoritative input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub next_step_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_number: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            description: String::new(),
            next_step_ids: Vec::new(),
            parent_step_id: None,
            branch_label: None,
            branch_condition: None,
            step_number: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_next<I, S>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_step_ids = next.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_step_id = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_branch_label(mut self, label: impl Into<String>) -> Self {
        self.branch_label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_branch_condition(mut self, condition: impl Into<String>) -> Self {
        self.branch_condition = Some(condition.into());
        self
    }

    /// A step is a branch child when a `Decision` owns it.
    #[must_use]
    pub fn is_branch_child(&self) -> bool {
        self.parent_step_id.is_some()
    }
}

/// An explicit decision edge: redundant with `next_step_ids`/`parent_step_id`
/// but authoritative for branch labels and conditions. After sanitization
/// every `Decision -> child` relationship has exactly one `Branch` record and
/// the child's `parent_step_id`/`branch_label` agree with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub parent_step_id: String,
    pub target_step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Branch {
    pub fn new(
        id: impl Into<String>,
        parent_step_id: impl Into<String>,
        target_step_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_step_id: parent_step_id.into(),
            target_step_id: target_step_id.into(),
            label: None,
            condition: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Free-form authoring section; not structurally significant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Authoring status of a blueprint version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintStatus {
    #[default]
    Draft,
    Building,
    Ready,
}

/// Derived readiness of a blueprint's content, persisted alongside the graph
/// after each rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    /// No steps at all.
    Empty,
    /// Steps exist but some are missing a name or description.
    Partial,
    /// Every step is named and described.
    Complete,
}

/// The workflow graph for one version of an automation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub id: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: BlueprintStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            steps: Vec::new(),
            branches: Vec::new(),
            sections: Vec::new(),
            summary: None,
            status: BlueprintStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    #[must_use]
    pub fn with_branches(mut self, branches: Vec<Branch>) -> Self {
        self.branches = branches;
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    #[must_use]
    pub fn contains_step(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Ids of every step, in declaration order.
    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Inbound-edge counts derived from `next_step_ids` only.
    pub fn inbound_counts(&self) -> FxHashMap<String, usize> {
        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for step in &self.steps {
            counts.entry(step.id.clone()).or_insert(0);
        }
        for step in &self.steps {
            for next in &step.next_step_ids {
                *counts.entry(next.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Resolve the start step: the first step with no inbound edge, falling
    /// back to the first `Trigger`-typed step when every step has inbound
    /// edges (fully cyclic input). `None` means the graph has no resolvable
    /// start and cannot be repaired.
    pub fn start_step(&self) -> Option<&Step> {
        if self.steps.is_empty() {
            return None;
        }
        let counts = self.inbound_counts();
        self.steps
            .iter()
            .find(|s| counts.get(s.id.as_str()).copied().unwrap_or(0) == 0)
            .or_else(|| self.steps.iter().find(|s| s.kind.is_trigger()))
    }

    /// Steps with no inbound edges, in declaration order.
    pub fn start_candidates(&self) -> Vec<&Step> {
        let counts = self.inbound_counts();
        self.steps
            .iter()
            .filter(|s| counts.get(s.id.as_str()).copied().unwrap_or(0) == 0)
            .collect()
    }

    /// Ids of every step reachable from `start` by following `next_step_ids`.
    pub fn reachable_from(&self, start: &str) -> FxHashSet<String> {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut stack = vec![start.to_string()];
        while let Some(id) = stack.pop() {
            if !self.contains_step(&id) || !seen.insert(id.clone()) {
                continue;
            }
            if let Some(step) = self.step(&id) {
                for next in &step.next_step_ids {
                    if !seen.contains(next) {
                        stack.push(next.clone());
                    }
                }
            }
        }
        seen
    }

    /// Derived readiness of the blueprint's content.
    #[must_use]
    pub fn completion_state(&self) -> CompletionState {
        if self.steps.is_empty() {
            return CompletionState::Empty;
        }
        let described = self
            .steps
            .iter()
            .all(|s| !s.name.trim().is_empty() && !s.description.trim().is_empty());
        if described {
            CompletionState::Complete
        } else {
            CompletionState::Partial
        }
    }
}
