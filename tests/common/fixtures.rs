//! Shared blueprint fixtures for integration tests.

use flowsmith::blueprint::{Blueprint, Step, StepKind};

/// Trigger -> action -> action, fully described.
pub fn linear_blueprint() -> Blueprint {
    Blueprint::new("bp-linear")
        .with_summary("Invoice intake")
        .with_steps(vec![
            Step::new("intake", StepKind::Trigger, "Receive invoice")
                .with_description("Email arrives")
                .with_next(["extract"]),
            Step::new("extract", StepKind::Action, "Extract fields")
                .with_description("Pull totals")
                .with_next(["archive"]),
            Step::new("archive", StepKind::Action, "Archive").with_description("File it"),
        ])
}

/// Trigger -> extract -> decision with two owned branch children that rejoin
/// at a shared step.
pub fn decision_blueprint() -> Blueprint {
    Blueprint::new("bp-decision").with_steps(vec![
        Step::new("intake", StepKind::Trigger, "Receive invoice").with_next(["extract"]),
        Step::new("extract", StepKind::Action, "Extract fields").with_next(["gate"]),
        Step::new("gate", StepKind::Decision, "Over limit?").with_next(["approve", "reject"]),
        Step::new("approve", StepKind::Action, "Auto-approve")
            .with_parent("gate")
            .with_branch_label("Under limit")
            .with_next(["archive"]),
        Step::new("reject", StepKind::Human, "Manual review")
            .with_parent("gate")
            .with_branch_label("Over limit")
            .with_next(["archive"]),
        Step::new("archive", StepKind::Action, "Archive"),
    ])
}

/// Fan-out wired straight from an action, with the branch children still
/// claiming the action as their parent even though a decision exists.
pub fn misparented_fanout_blueprint() -> Blueprint {
    Blueprint::new("bp-messy").with_steps(vec![
        Step::new("intake", StepKind::Trigger, "Receive invoice").with_next(["extract"]),
        Step::new("extract", StepKind::Action, "Extract fields")
            .with_next(["gate", "approve", "reject"]),
        Step::new("gate", StepKind::Decision, "Over limit?").with_next(["approve", "reject"]),
        Step::new("approve", StepKind::Action, "Auto-approve").with_parent("extract"),
        Step::new("reject", StepKind::Human, "Manual review").with_parent("extract"),
    ])
}

/// Two actions pointing at each other with no trigger: no resolvable start.
pub fn unresolvable_blueprint() -> Blueprint {
    Blueprint::new("bp-stuck").with_steps(vec![
        Step::new("a", StepKind::Action, "A").with_next(["b"]),
        Step::new("b", StepKind::Action, "B").with_next(["a"]),
    ])
}
