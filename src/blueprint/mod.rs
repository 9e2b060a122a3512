//! Blueprint graph model and the pure transforms that keep it valid.
//!
//! A [`Blueprint`] is the design-time workflow graph for one version of an
//! automation: an ordered list of [`Step`]s, explicit decision [`Branch`]
//! records, and free-form authoring metadata. AI-generated blueprints are
//! untrusted input; everything that touches one first routes it through the
//! single repair chokepoint in this module:
//!
//! - [`sanitize`] repairs arbitrary graphs into a valid, deterministic
//!   structure (dangling references trimmed, edges deduplicated, decision
//!   ownership enforced, cycles broken, orphans reattached, branch records
//!   resynchronized) and reports what it did in a [`SanitizeSummary`].
//! - [`number`] assigns deterministic display numbers (`1, 2, 3`, with
//!   `3A`/`3B` for decision branch children) to a sanitized graph.
//!
//! Both transforms are idempotent: re-running them on their own output is a
//! structural no-op.
//!
//! ```
//! use flowsmith::blueprint::{Blueprint, Step, StepKind, number, sanitize};
//!
//! let bp = Blueprint::new("bp-1").with_steps(vec![
//!     Step::new("intake", StepKind::Trigger, "Intake").with_next(["review"]),
//!     Step::new("review", StepKind::Action, "Review"),
//! ]);
//!
//! let (clean, summary) = sanitize(bp);
//! assert!(summary.start_resolved);
//!
//! let numbered = number(clean);
//! assert_eq!(numbered.step("intake").unwrap().step_number.as_deref(), Some("1"));
//! assert_eq!(numbered.step("review").unwrap().step_number.as_deref(), Some("2"));
//! ```

mod model;
mod numbering;
mod sanitizer;

pub use model::{
    Blueprint, BlueprintStatus, Branch, CompletionState, Section, Step, StepKind,
};
pub use numbering::number;
pub use sanitizer::{SanitizeSummary, sanitize};
