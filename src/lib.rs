//! # Flowsmith: Workflow Blueprint Integrity and Rebuild Pipeline
//!
//! Flowsmith takes machine-generated business-process blueprints, repairs
//! their graph structure, gives every step a stable display number, and runs
//! the asynchronous rebuild pipeline that produces them, streaming normalized
//! progress to subscribers along the way.
//!
//! ## Core Concepts
//!
//! - **Blueprint**: A directed graph of steps with decision branches
//! - **Sanitizer**: Deterministic repair passes that make any candidate graph safe to persist
//! - **Numbering**: Display labels (`1, 2, 3`, `3A`, `3A1`) derived purely from structure
//! - **Activity**: Throttled, sequence-stamped progress events with snapshot-plus-replay
//! - **Pipeline**: Queue, single worker, staleness gate, and retry budget
//!
//! ## Quick Start
//!
//! ### Repairing and numbering a candidate graph
//!
//! ```
//! use flowsmith::blueprint::{Blueprint, Step, StepKind, number, sanitize};
//!
//! let candidate = Blueprint::new("bp").with_steps(vec![
//!     Step::new("intake", StepKind::Trigger, "Intake").with_next(["route"]),
//!     Step::new("route", StepKind::Decision, "Route").with_next(["fast", "slow"]),
//!     Step::new("fast", StepKind::Action, "Fast path").with_parent("route"),
//!     Step::new("slow", StepKind::Human, "Manual review").with_parent("route"),
//! ]);
//!
//! let (clean, repair) = sanitize(candidate);
//! assert!(repair.start_resolved);
//!
//! let numbered = number(clean);
//! assert_eq!(numbered.step("fast").unwrap().step_number.as_deref(), Some("2A"));
//! ```
//!
//! ### Subscribing to a run
//!
//! ```
//! use flowsmith::activity::{ActivityBus, ActivityEvent};
//!
//! let bus = ActivityBus::default();
//! let (snapshot, _stream) = bus.subscribe("run-1");
//! assert!(snapshot.events.is_empty());
//!
//! let stamped = bus.publish(ActivityEvent::running("run-1", "prepare", "Starting"));
//! assert_eq!(stamped.seq, 1);
//! ```
//!
//! ## Module Guide
//!
//! - [`blueprint`] - Graph model, sanitizer passes, and display numbering
//! - [`activity`] - Event normalization, per-run fan-out, and sinks
//! - [`pipeline`] - Build queue, worker, builder and store seams
//! - [`telemetry`] - Terminal-oriented event formatting

pub mod activity;
pub mod blueprint;
pub mod pipeline;
pub mod telemetry;
