//! Deterministic display numbering for sanitized blueprints.
//!
//! The main execution line gets sequential integers (`1, 2, 3, …`); branch
//! children of a `Decision` step get the parent's number plus a letter in
//! branch declaration order (`3A`, `3B`), and branch children of a nested
//! `Decision` alternate back to digits (`3A1`, `3A2`). Continuations of a
//! branch (join steps that are not themselves branch children) rejoin the
//! integer main line.
//!
//! Numbering is a pure function of graph structure: re-running it on an
//! already-numbered, structurally unchanged blueprint reproduces identical
//! labels.

use rustc_hash::FxHashSet;

use super::model::Blueprint;

/// Assign display numbers to every step reachable from the start.
///
/// Sanitized input is assumed; on a blueprint with no resolvable start the
/// graph is returned untouched.
///
/// ```
/// use flowsmith::blueprint::{Blueprint, Step, StepKind, number};
///
/// let bp = Blueprint::new("bp").with_steps(vec![
///     Step::new("in", StepKind::Trigger, "Intake").with_next(["gate"]),
///     Step::new("gate", StepKind::Decision, "Route").with_next(["yes", "no"]),
///     Step::new("yes", StepKind::Action, "Approve").with_parent("gate"),
///     Step::new("no", StepKind::Human, "Review").with_parent("gate"),
/// ]);
/// let numbered = number(bp);
/// assert_eq!(numbered.step("gate").unwrap().step_number.as_deref(), Some("2"));
/// assert_eq!(numbered.step("yes").unwrap().step_number.as_deref(), Some("2A"));
/// assert_eq!(numbered.step("no").unwrap().step_number.as_deref(), Some("2B"));
/// ```
pub fn number(mut blueprint: Blueprint) -> Blueprint {
    let Some(start) = blueprint.start_step().map(|s| s.id.clone()) else {
        return blueprint;
    };

    for step in &mut blueprint.steps {
        step.step_number = None;
    }

    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut next_main: u32 = 1;
    // Depth-first over the main line; first declared successor walks first.
    let mut stack: Vec<String> = vec![start];

    while let Some(id) = stack.pop() {
        if visited.contains(&id) {
            continue;
        }
        let Some(step) = blueprint.step(&id) else {
            continue;
        };
        if step.is_branch_child() {
            // Labeled by its owning decision, not the main counter.
            continue;
        }
        visited.insert(id.clone());
        let label = next_main.to_string();
        next_main += 1;

        let is_decision = step.kind.is_decision();
        let successors = step.next_step_ids.clone();
        if let Some(step) = blueprint.step_mut(&id) {
            step.step_number = Some(label.clone());
        }
        if is_decision {
            label_branch_children(&mut blueprint, &id, &label, &mut visited, &mut stack);
        }
        for succ in successors.iter().rev() {
            if !visited.contains(succ) {
                stack.push(succ.clone());
            }
        }
    }

    blueprint
}

/// Label the branch children of `decision_id` as `<parent><suffix>` and feed
/// their continuations back onto the main-line stack.
fn label_branch_children(
    bp: &mut Blueprint,
    decision_id: &str,
    parent_label: &str,
    visited: &mut FxHashSet<String>,
    stack: &mut Vec<String>,
) {
    let children: Vec<String> = bp
        .step(decision_id)
        .map(|s| s.next_step_ids.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|c| {
            bp.step(c)
                .is_some_and(|s| s.parent_step_id.as_deref() == Some(decision_id))
        })
        .collect();

    let mut continuations: Vec<String> = Vec::new();
    for (idx, child_id) in children.iter().enumerate() {
        if visited.contains(child_id) {
            continue;
        }
        visited.insert(child_id.clone());
        let label = compose_label(parent_label, idx);
        let is_decision = bp.step(child_id).is_some_and(|s| s.kind.is_decision());
        let successors = bp
            .step(child_id)
            .map(|s| s.next_step_ids.clone())
            .unwrap_or_default();
        if let Some(child) = bp.step_mut(child_id) {
            child.step_number = Some(label.clone());
        }
        if is_decision {
            label_branch_children(bp, child_id, &label, visited, stack);
        }
        // Successors rejoin the main line; any that are themselves branch
        // children get skipped there and labeled by their own decision.
        continuations.extend(successors);
    }
    for succ in continuations.iter().rev() {
        if !visited.contains(succ) {
            stack.push(succ.clone());
        }
    }
}

/// `3 -> 3A/3B`, `3A -> 3A1/3A2`, `3A1 -> 3A1A/3A1B`, …
fn compose_label(parent_label: &str, idx: usize) -> String {
    let nested = parent_label
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_alphabetic());
    if nested {
        format!("{parent_label}{}", idx + 1)
    } else {
        format!("{parent_label}{}", branch_letter(idx))
    }
}

/// `A..Z`, then doubled letters (`AA`, `BB`, …) past 26 branches.
fn branch_letter(idx: usize) -> String {
    let letter = (b'A' + (idx % 26) as u8) as char;
    std::iter::repeat_n(letter, idx / 26 + 1).collect()
}
