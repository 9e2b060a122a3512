mod common;

use common::{
    decision_blueprint, linear_blueprint, misparented_fanout_blueprint, unresolvable_blueprint,
};
use flowsmith::blueprint::{Blueprint, Step, StepKind, number, sanitize};

#[test]
fn clean_blueprint_needs_no_repair() {
    let (clean, summary) = sanitize(decision_blueprint());
    assert!(summary.start_resolved);
    assert!(!summary.repaired_anything());
    // Branch records get materialized from the decision's owned children.
    assert_eq!(clean.branches.len(), 2);
}

#[test]
fn reparents_misrouted_fanout_to_the_decision() {
    let (clean, summary) = sanitize(misparented_fanout_blueprint());

    assert!(summary.start_resolved);
    assert!(summary.branches_reparented >= 2);

    // The action keeps only its edge to the decision.
    assert_eq!(clean.step("extract").unwrap().next_step_ids, vec!["gate"]);

    // Both children now belong to the decision.
    for child in ["approve", "reject"] {
        let step = clean.step(child).unwrap();
        assert_eq!(step.parent_step_id.as_deref(), Some("gate"));
        assert!(
            clean
                .step("gate")
                .unwrap()
                .next_step_ids
                .contains(&child.to_string())
        );
    }

    // Exactly one branch record per decision child.
    assert_eq!(clean.branches.len(), 2);
    for branch in &clean.branches {
        assert_eq!(branch.parent_step_id, "gate");
    }
}

#[test]
fn inserts_a_decision_for_parented_fanout_without_one() {
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("start", StepKind::Trigger, "Start").with_next(["split"]),
        Step::new("split", StepKind::Action, "Split").with_next(["left", "right"]),
        Step::new("left", StepKind::Action, "Left").with_parent("split"),
        Step::new("right", StepKind::Action, "Right").with_parent("split"),
    ]);
    let (clean, summary) = sanitize(bp);

    assert_eq!(summary.decisions_inserted, 1);
    let inserted = clean
        .steps
        .iter()
        .find(|s| s.kind.is_decision())
        .expect("a decision step was inserted");
    assert_eq!(clean.step("split").unwrap().next_step_ids, vec![
        inserted.id.clone()
    ]);
    for child in ["left", "right"] {
        assert_eq!(
            clean.step(child).unwrap().parent_step_id.as_deref(),
            Some(inserted.id.as_str())
        );
    }
    assert_eq!(clean.branches.len(), 2);
}

#[test]
fn trims_dangling_edges_and_parents() {
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("a", StepKind::Trigger, "A").with_next(["b", "ghost"]),
        Step::new("b", StepKind::Action, "B").with_parent("phantom"),
    ]);
    let (clean, summary) = sanitize(bp);

    assert_eq!(summary.dangling_trimmed, 2);
    assert_eq!(clean.step("a").unwrap().next_step_ids, vec!["b"]);
    assert!(clean.step("b").unwrap().parent_step_id.is_none());
}

#[test]
fn removes_duplicate_edges() {
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("a", StepKind::Trigger, "A").with_next(["b", "b"]),
        Step::new("b", StepKind::Action, "B"),
    ]);
    let (clean, summary) = sanitize(bp);

    assert_eq!(summary.duplicates_removed, 1);
    assert_eq!(clean.step("a").unwrap().next_step_ids, vec!["b"]);
}

#[test]
fn breaks_back_edges() {
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("a", StepKind::Trigger, "A").with_next(["b"]),
        Step::new("b", StepKind::Action, "B").with_next(["c"]),
        Step::new("c", StepKind::Action, "C").with_next(["a"]),
    ]);
    let (clean, summary) = sanitize(bp);

    assert_eq!(summary.cycles_broken, 1);
    assert!(clean.step("c").unwrap().next_step_ids.is_empty());
    assert_eq!(clean.step("a").unwrap().next_step_ids, vec!["b"]);
}

#[test]
fn reattaches_orphans_to_the_main_line_terminal() {
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("a", StepKind::Trigger, "A").with_next(["b"]),
        Step::new("b", StepKind::Action, "B"),
        Step::new("stray", StepKind::Action, "Stray"),
    ]);
    let (clean, summary) = sanitize(bp);

    assert_eq!(summary.orphans_reattached, 1);
    assert_eq!(clean.step("b").unwrap().next_step_ids, vec!["stray"]);

    let reachable = clean.reachable_from("a");
    assert_eq!(reachable.len(), clean.step_count());
}

#[test]
fn reattaches_disconnected_cluster_by_its_head() {
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("a", StepKind::Trigger, "A").with_next(["b"]),
        Step::new("b", StepKind::Action, "B"),
        Step::new("island1", StepKind::Action, "Island head").with_next(["island2"]),
        Step::new("island2", StepKind::Action, "Island tail"),
    ]);
    let (clean, summary) = sanitize(bp);

    // Attaching the zero-inbound head brings the whole cluster along.
    assert_eq!(summary.orphans_reattached, 1);
    assert_eq!(clean.step("b").unwrap().next_step_ids, vec!["island1"]);
    assert_eq!(clean.reachable_from("a").len(), 4);
}

#[test]
fn cycle_break_clears_branch_claims_left_without_edges() {
    // The claim points at a decision downstream of the step itself, so the
    // enforced decision edge closes a cycle and gets cut again.
    let bp = Blueprint::new("bp").with_steps(vec![
        Step::new("s0", StepKind::Trigger, "Start").with_next(["collect"]),
        Step::new("collect", StepKind::Action, "Collect")
            .with_next(["route"])
            .with_parent("route"),
        Step::new("route", StepKind::Decision, "Route"),
    ]);
    let (clean, summary) = sanitize(bp);

    assert_eq!(summary.cycles_broken, 1);
    // The stranded claim is gone, along with any branch record for it.
    assert!(clean.step("collect").unwrap().parent_step_id.is_none());
    assert!(clean.branches.is_empty());

    // The step is back on the main line and numbering reaches everything.
    let numbered = number(clean.clone());
    assert!(numbered.steps.iter().all(|s| s.step_number.is_some()));
    assert_eq!(
        numbered.step("collect").unwrap().step_number.as_deref(),
        Some("2")
    );

    let (_, again) = sanitize(clean);
    assert!(!again.repaired_anything(), "second pass repaired again");
}

#[test]
fn unresolvable_start_returns_input_unchanged() {
    let bp = unresolvable_blueprint();
    let steps_before = bp.steps.clone();
    let (unchanged, summary) = sanitize(bp);

    assert!(!summary.start_resolved);
    assert!(!summary.repaired_anything());
    assert_eq!(unchanged.steps, steps_before);
}

#[test]
fn empty_blueprint_is_unresolvable() {
    let (unchanged, summary) = sanitize(Blueprint::new("bp-empty"));
    assert!(!summary.start_resolved);
    assert!(unchanged.steps.is_empty());
}

#[test]
fn sanitize_is_idempotent() {
    for messy in [
        misparented_fanout_blueprint(),
        decision_blueprint(),
        linear_blueprint(),
    ] {
        let (once, _) = sanitize(messy);
        let (twice, summary) = sanitize(once.clone());
        assert!(!summary.repaired_anything(), "second pass repaired again");
        assert_eq!(once.steps, twice.steps);
        assert_eq!(once.branches, twice.branches);
    }
}
