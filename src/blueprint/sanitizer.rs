//! Topology sanitizer: repairs arbitrary (typically AI-generated) blueprints
//! into a valid, deterministic structure.
//!
//! The sanitizer is the single chokepoint between untrusted graph content and
//! everything else in the crate. It never fails on malformed input; malformed
//! input is exactly what it exists to repair. The one thing it cannot repair
//! is a graph with no resolvable start step, in which case the blueprint is
//! returned unchanged with [`SanitizeSummary::start_resolved`] left `false`
//! and the caller decides what to do.
//!
//! Repair passes run in a fixed order:
//!
//! 1. dangling references trimmed (edges, branch records, parent claims)
//! 2. duplicate `(source, target)` edges collapsed across `next_step_ids`
//!    and the `branches` list
//! 3. decision ownership enforced (branch children reparented onto the
//!    owning `Decision`, inserting one when a non-Decision step carries the
//!    fan-out)
//! 4. cycles broken by DFS back-edge elimination from the start
//! 5. orphan clusters reattached, one root at a time, to the evolving
//!    main-line terminal
//! 6. branch claims whose backing edge was cut by a cycle break cleared
//!    back to plain sequential steps
//! 7. the `branches` list regenerated to mirror the repaired edges

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::model::{Blueprint, Branch, Step, StepKind};

/// Counts of the repairs a [`sanitize`] call performed.
///
/// Used for audit and telemetry only, never for control flow. The one
/// exception is [`start_resolved`](Self::start_resolved): when `false`, no
/// repairs were attempted and the blueprint came back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizeSummary {
    pub dangling_trimmed: usize,
    pub duplicates_removed: usize,
    pub branches_reparented: usize,
    pub cycles_broken: usize,
    pub orphans_reattached: usize,
    pub decisions_inserted: usize,
    pub start_resolved: bool,
}

impl SanitizeSummary {
    /// Total number of individual repairs across all passes.
    #[must_use]
    pub fn repair_count(&self) -> usize {
        self.dangling_trimmed
            + self.duplicates_removed
            + self.branches_reparented
            + self.cycles_broken
            + self.orphans_reattached
            + self.decisions_inserted
    }

    /// `true` when at least one repair was made.
    #[must_use]
    pub fn repaired_anything(&self) -> bool {
        self.repair_count() > 0
    }
}

/// Repair a blueprint's edges and branch ownership.
///
/// Idempotent: sanitizing the output again reports zero repairs.
///
/// ```
/// use flowsmith::blueprint::{Blueprint, Step, StepKind, sanitize};
///
/// let bp = Blueprint::new("bp").with_steps(vec![
///     Step::new("a", StepKind::Trigger, "A").with_next(["b", "missing"]),
///     Step::new("b", StepKind::Action, "B").with_next(["a"]),
/// ]);
/// let (clean, summary) = sanitize(bp);
/// assert_eq!(summary.dangling_trimmed, 1);
/// assert_eq!(summary.cycles_broken, 1);
/// assert!(clean.step("b").unwrap().next_step_ids.is_empty());
/// ```
pub fn sanitize(mut blueprint: Blueprint) -> (Blueprint, SanitizeSummary) {
    let mut summary = SanitizeSummary::default();
    if blueprint.start_step().is_none() {
        tracing::debug!(
            blueprint = %blueprint.id,
            steps = blueprint.step_count(),
            "no resolvable start step, returning blueprint unchanged"
        );
        return (blueprint, summary);
    }
    summary.start_resolved = true;

    trim_dangling(&mut blueprint, &mut summary);
    dedup_edges(&mut blueprint, &mut summary);
    enforce_decision_ownership(&mut blueprint, &mut summary);
    break_cycles(&mut blueprint, &mut summary);
    reattach_orphans(&mut blueprint, &mut summary);
    clear_unbacked_parent_claims(&mut blueprint, &mut summary);
    resync_branches(&mut blueprint);

    if summary.repaired_anything() {
        tracing::debug!(blueprint = %blueprint.id, ?summary, "sanitized blueprint");
    }
    (blueprint, summary)
}

fn has_edge(bp: &Blueprint, from: &str, to: &str) -> bool {
    bp.step(from)
        .is_some_and(|s| s.next_step_ids.iter().any(|n| n == to))
}

/// Add `from -> to` unless already present. Returns `true` when added.
fn ensure_edge(bp: &mut Blueprint, from: &str, to: &str) -> bool {
    if has_edge(bp, from, to) {
        return false;
    }
    if let Some(step) = bp.step_mut(from) {
        step.next_step_ids.push(to.to_string());
        return true;
    }
    false
}

/// Remove `from -> to`. Returns `true` when an edge was removed.
fn remove_edge(bp: &mut Blueprint, from: &str, to: &str) -> bool {
    if let Some(step) = bp.step_mut(from) {
        let before = step.next_step_ids.len();
        step.next_step_ids.retain(|n| n != to);
        return step.next_step_ids.len() < before;
    }
    false
}

/// Pass 1: drop references to step ids that do not exist.
fn trim_dangling(bp: &mut Blueprint, summary: &mut SanitizeSummary) {
    let ids: FxHashSet<String> = bp.steps.iter().map(|s| s.id.clone()).collect();

    for step in &mut bp.steps {
        let before = step.next_step_ids.len();
        step.next_step_ids.retain(|n| ids.contains(n));
        summary.dangling_trimmed += before - step.next_step_ids.len();

        if let Some(parent) = &step.parent_step_id {
            if !ids.contains(parent) {
                step.parent_step_id = None;
                summary.dangling_trimmed += 1;
            }
        }
    }

    let before = bp.branches.len();
    bp.branches
        .retain(|b| ids.contains(&b.parent_step_id) && ids.contains(&b.target_step_id));
    summary.dangling_trimmed += before - bp.branches.len();
}

/// Pass 2: collapse duplicate `(source, target)` pairs, treating the
/// `branches` list and `next_step_ids` as one edge set.
fn dedup_edges(bp: &mut Blueprint, summary: &mut SanitizeSummary) {
    // A branch edge absent from its parent's next list is restored first so
    // later passes see the union.
    let branch_edges: Vec<(String, String)> = bp
        .branches
        .iter()
        .map(|b| (b.parent_step_id.clone(), b.target_step_id.clone()))
        .collect();
    for (parent, target) in branch_edges {
        ensure_edge(bp, &parent, &target);
    }

    for step in &mut bp.steps {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let before = step.next_step_ids.len();
        step.next_step_ids.retain(|n| seen.insert(n.clone()));
        summary.duplicates_removed += before - step.next_step_ids.len();
    }

    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    let before = bp.branches.len();
    bp.branches
        .retain(|b| seen.insert((b.parent_step_id.clone(), b.target_step_id.clone())));
    summary.duplicates_removed += before - bp.branches.len();
}

/// Pass 3: every branch child must hang off a `Decision` step.
fn enforce_decision_ownership(bp: &mut Blueprint, summary: &mut SanitizeSummary) {
    // Claims grouped by the parent the children currently name, in
    // first-appearance order for determinism.
    let mut order: Vec<String> = Vec::new();
    let mut claims: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for step in &bp.steps {
        if let Some(parent) = &step.parent_step_id {
            if !claims.contains_key(parent) {
                order.push(parent.clone());
            }
            claims.entry(parent.clone()).or_default().push(step.id.clone());
        }
    }

    for owner_id in order {
        let children = claims.get(&owner_id).cloned().unwrap_or_default();
        let owner_is_decision = bp
            .step(&owner_id)
            .is_some_and(|s| s.kind.is_decision());
        if owner_is_decision {
            for child in &children {
                ensure_edge(bp, &owner_id, child);
            }
            continue;
        }

        match find_owning_decision(bp, &owner_id, &children) {
            Some(decision_id) => {
                reparent_children(bp, &owner_id, &decision_id, &children, summary);
            }
            None if children.len() >= 2 => {
                // A non-Decision step carries a branch fan-out and no
                // Decision exists on the path: insert one.
                let decision_id = insert_decision_after(bp, &owner_id);
                summary.decisions_inserted += 1;
                ensure_edge(bp, &owner_id, &decision_id);
                reparent_children(bp, &owner_id, &decision_id, &children, summary);
            }
            None => {
                // Lone stray claim with no Decision in sight: the step is a
                // plain sequential successor, not a branch child.
                for child in &children {
                    if let Some(step) = bp.step_mut(child) {
                        step.parent_step_id = None;
                        step.branch_label = None;
                        step.branch_condition = None;
                        summary.branches_reparented += 1;
                    }
                }
            }
        }
    }

    // Every direct successor of a Decision is one of its branch children.
    let decision_ids: Vec<String> = bp
        .steps
        .iter()
        .filter(|s| s.kind.is_decision())
        .map(|s| s.id.clone())
        .collect();
    for decision_id in decision_ids {
        let children = bp
            .step(&decision_id)
            .map(|s| s.next_step_ids.clone())
            .unwrap_or_default();
        for child_id in children {
            let keep = bp.step(&child_id).is_some_and(|c| {
                c.parent_step_id.as_deref().is_some_and(|p| {
                    p == decision_id
                        || (bp.step(p).is_some_and(|ps| ps.kind.is_decision())
                            && has_edge(bp, p, &child_id))
                })
            });
            if keep {
                continue;
            }
            if let Some(child) = bp.step_mut(&child_id) {
                let had_other_parent = child.parent_step_id.is_some();
                child.parent_step_id = Some(decision_id.clone());
                if had_other_parent {
                    summary.branches_reparented += 1;
                }
            }
        }
    }

    // Decision parents named by a child always have the matching edge.
    let pairs: Vec<(String, String)> = bp
        .steps
        .iter()
        .filter_map(|s| s.parent_step_id.clone().map(|p| (p, s.id.clone())))
        .collect();
    for (parent, child) in pairs {
        ensure_edge(bp, &parent, &child);
    }
}

fn reparent_children(
    bp: &mut Blueprint,
    old_owner: &str,
    decision_id: &str,
    children: &[String],
    summary: &mut SanitizeSummary,
) {
    for child in children {
        remove_edge(bp, old_owner, child);
        ensure_edge(bp, decision_id, child);
        if let Some(step) = bp.step_mut(child) {
            step.parent_step_id = Some(decision_id.to_string());
            summary.branches_reparented += 1;
        }
    }
}

/// The Decision that should own `children` claimed by non-Decision `owner`:
/// a Decision successor of the owner already wired to one of the children,
/// else any Decision successor, else the owner's nearest Decision ancestor.
fn find_owning_decision(bp: &Blueprint, owner: &str, children: &[String]) -> Option<String> {
    let successors = bp.step(owner).map(|s| s.next_step_ids.clone())?;
    let decision_successors: Vec<&String> = successors
        .iter()
        .filter(|n| bp.step(n).is_some_and(|s| s.kind.is_decision()))
        .collect();
    for candidate in &decision_successors {
        if children.iter().any(|c| has_edge(bp, candidate, c)) {
            return Some((*candidate).clone());
        }
    }
    if let Some(first) = decision_successors.first() {
        return Some((*first).clone());
    }
    nearest_decision_ancestor(bp, owner)
}

/// Breadth-first walk over inbound edges, nearest Decision wins.
fn nearest_decision_ancestor(bp: &Blueprint, from: &str) -> Option<String> {
    let mut inbound: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for step in &bp.steps {
        for next in &step.next_step_ids {
            inbound.entry(next.as_str()).or_default().push(step.id.as_str());
        }
    }
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(from);
    queue.push_back(from);
    while let Some(id) = queue.pop_front() {
        for parent in inbound.get(id).into_iter().flatten() {
            if !seen.insert(parent) {
                continue;
            }
            if bp.step(parent).is_some_and(|s| s.kind.is_decision()) {
                return Some((*parent).to_string());
            }
            queue.push_back(parent);
        }
    }
    None
}

/// Insert a synthesized Decision step directly after `owner` in declaration
/// order. The id is derived from the owner so repeated sanitization of
/// equivalent input stays deterministic.
fn insert_decision_after(bp: &mut Blueprint, owner: &str) -> String {
    let mut decision_id = format!("{owner}-decision");
    while bp.contains_step(&decision_id) {
        decision_id.push('x');
    }
    let decision = Step::new(decision_id.clone(), StepKind::Decision, "Decision");
    let position = bp
        .steps
        .iter()
        .position(|s| s.id == owner)
        .map_or(bp.steps.len(), |p| p + 1);
    bp.steps.insert(position, decision);
    decision_id
}

/// Pass 4: depth-first back-edge elimination from the start candidates.
fn break_cycles(bp: &mut Blueprint, summary: &mut SanitizeSummary) {
    let mut roots: Vec<String> = bp.start_candidates().iter().map(|s| s.id.clone()).collect();
    if roots.is_empty() {
        if let Some(start) = bp.start_step().map(|s| s.id.clone()) {
            roots.push(start);
        } else {
            return;
        }
    }

    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut removals: Vec<(String, String)> = Vec::new();
    for root in roots {
        dfs_collect_back_edges(bp, &root, &mut visited, &mut removals);
    }
    for (from, to) in removals {
        if remove_edge(bp, &from, &to) {
            summary.cycles_broken += 1;
        }
    }
}

fn dfs_collect_back_edges(
    bp: &Blueprint,
    root: &str,
    visited: &mut FxHashSet<String>,
    removals: &mut Vec<(String, String)>,
) {
    if visited.contains(root) {
        return;
    }
    visited.insert(root.to_string());
    let mut on_stack: FxHashSet<String> = FxHashSet::default();
    on_stack.insert(root.to_string());
    let mut stack: Vec<(String, usize)> = vec![(root.to_string(), 0)];

    while let Some((id, idx)) = stack.last().cloned() {
        let successors = bp.step(&id).map(|s| s.next_step_ids.clone()).unwrap_or_default();
        if idx >= successors.len() {
            stack.pop();
            on_stack.remove(&id);
            continue;
        }
        if let Some(frame) = stack.last_mut() {
            frame.1 += 1;
        }
        let child = successors[idx].clone();
        if on_stack.contains(&child) {
            // Revisiting a step on the current traversal stack closes a
            // cycle; drop the edge.
            removals.push((id, child));
            continue;
        }
        if visited.insert(child.clone()) {
            on_stack.insert(child.clone());
            stack.push((child, 0));
        }
    }
}

/// Pass 5: link disconnected steps from the terminal of the main execution
/// line, one cluster root at a time.
fn reattach_orphans(bp: &mut Blueprint, summary: &mut SanitizeSummary) {
    let Some(start) = bp.start_step().map(|s| s.id.clone()) else {
        return;
    };
    loop {
        let reachable = bp.reachable_from(&start);
        if reachable.len() == bp.step_count() {
            break;
        }
        let counts = bp.inbound_counts();
        let orphan = bp
            .steps
            .iter()
            .find(|s| {
                !reachable.contains(&s.id)
                    && counts.get(s.id.as_str()).copied().unwrap_or(0) == 0
            })
            .or_else(|| bp.steps.iter().find(|s| !reachable.contains(&s.id)))
            .map(|s| s.id.clone());
        let Some(orphan) = orphan else { break };

        let terminal = main_line_terminal(bp, &start, &reachable);
        ensure_edge(bp, &terminal, &orphan);
        summary.orphans_reattached += 1;
        tracing::debug!(
            blueprint = %bp.id,
            orphan = %orphan,
            attached_to = %terminal,
            "reattached orphan step"
        );
        // A newly reachable cluster may carry cycles of its own.
        break_cycles(bp, summary);
    }
}

/// The step on the longest acyclic path from `start` with no outgoing edges,
/// ties broken by declaration order.
fn main_line_terminal(bp: &Blueprint, start: &str, reachable: &FxHashSet<String>) -> String {
    let mut indegree: FxHashMap<String, usize> = FxHashMap::default();
    for step in &bp.steps {
        if !reachable.contains(&step.id) {
            continue;
        }
        indegree.entry(step.id.clone()).or_insert(0);
        for next in &step.next_step_ids {
            if reachable.contains(next) {
                *indegree.entry(next.clone()).or_insert(0) += 1;
            }
        }
    }

    // Longest-path distances over the reachable DAG, Kahn order.
    let mut dist: FxHashMap<String, usize> = FxHashMap::default();
    let mut queue: VecDeque<String> = bp
        .steps
        .iter()
        .filter(|s| reachable.contains(&s.id))
        .filter(|s| indegree.get(&s.id).copied().unwrap_or(0) == 0)
        .map(|s| s.id.clone())
        .collect();
    while let Some(id) = queue.pop_front() {
        let d = dist.get(&id).copied().unwrap_or(0);
        let successors = bp.step(&id).map(|s| s.next_step_ids.clone()).unwrap_or_default();
        for next in successors {
            if !reachable.contains(&next) {
                continue;
            }
            let entry = dist.entry(next.clone()).or_insert(0);
            if *entry < d + 1 {
                *entry = d + 1;
            }
            if let Some(count) = indegree.get_mut(&next) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    let mut best: Option<(String, usize)> = None;
    for step in &bp.steps {
        if !reachable.contains(&step.id) {
            continue;
        }
        let is_sink = step.next_step_ids.iter().all(|n| !reachable.contains(n));
        if !is_sink {
            continue;
        }
        let d = dist.get(&step.id).copied().unwrap_or(0);
        if best.as_ref().is_none_or(|(_, bd)| d > *bd) {
            best = Some((step.id.clone(), d));
        }
    }
    best.map(|(id, _)| id).unwrap_or_else(|| start.to_string())
}

/// Pass 6: a cycle break can cut the edge behind a branch claim, leaving a
/// step that names a parent with no live edge to it. Such a step is a plain
/// sequential successor again; a dangling claim would otherwise hide the
/// step from numbering and re-trigger the cycle break on every pass.
fn clear_unbacked_parent_claims(bp: &mut Blueprint, summary: &mut SanitizeSummary) {
    let unbacked: Vec<String> = bp
        .steps
        .iter()
        .filter(|s| {
            s.parent_step_id
                .as_deref()
                .is_some_and(|p| !has_edge(bp, p, &s.id))
        })
        .map(|s| s.id.clone())
        .collect();
    for id in unbacked {
        if let Some(step) = bp.step_mut(&id) {
            step.parent_step_id = None;
            step.branch_label = None;
            step.branch_condition = None;
            summary.branches_reparented += 1;
        }
    }
}

/// Pass 7: regenerate the `branches` list from the repaired steps, reusing
/// prior branch ids and synchronizing labels/conditions both ways.
fn resync_branches(bp: &mut Blueprint) {
    let prior: FxHashMap<(String, String), Branch> = bp
        .branches
        .drain(..)
        .map(|b| ((b.parent_step_id.clone(), b.target_step_id.clone()), b))
        .collect();

    // Labels on steps that are no longer branch children are stale.
    for step in &mut bp.steps {
        if step.parent_step_id.is_none() {
            step.branch_label = None;
            step.branch_condition = None;
        }
    }

    let decision_children: Vec<(String, Vec<String>)> = bp
        .steps
        .iter()
        .filter(|s| s.kind.is_decision())
        .map(|s| (s.id.clone(), s.next_step_ids.clone()))
        .collect();

    let mut branches = Vec::new();
    for (decision_id, children) in decision_children {
        for child_id in children {
            let owned = bp
                .step(&child_id)
                .is_some_and(|c| c.parent_step_id.as_deref() == Some(decision_id.as_str()));
            if !owned {
                continue;
            }
            let key = (decision_id.clone(), child_id.clone());
            let existing = prior.get(&key);
            let (label, condition) = {
                let child = bp.step(&child_id).cloned();
                let label = child
                    .as_ref()
                    .and_then(|c| c.branch_label.clone())
                    .or_else(|| existing.and_then(|b| b.label.clone()));
                let condition = child
                    .as_ref()
                    .and_then(|c| c.branch_condition.clone())
                    .or_else(|| existing.and_then(|b| b.condition.clone()));
                (label, condition)
            };
            if let Some(child) = bp.step_mut(&child_id) {
                child.branch_label = label.clone();
                child.branch_condition = condition.clone();
            }
            let id = existing
                .map(|b| b.id.clone())
                .unwrap_or_else(|| format!("branch-{decision_id}-{child_id}"));
            branches.push(Branch {
                id,
                parent_step_id: decision_id.clone(),
                target_step_id: child_id,
                label,
                condition,
            });
        }
    }
    bp.branches = branches;
}
