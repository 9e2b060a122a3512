//! Live build telemetry: normalized progress events, per-run fan-out, and
//! pluggable sinks.
//!
//! Raw progress signals from a rebuild are noisy and unbounded. The
//! [`ActivityNormalizer`] turns them into a short, readable narrative (one
//! event per stage transition, throttled updates, terminal events always
//! delivered); the [`ActivityBus`] stamps each event with a per-run `seq`,
//! keeps a bounded replay buffer for late subscribers, and fans events out
//! to broadcast streams and global [`ActivitySink`]s.
//!
//! Subscribers receive an [`ActivitySnapshot`] first and then live
//! [`ActivityEvent`]s; delivery is at-least-once and the snapshot may race
//! live events, so clients reconcile by sorting on `seq` and dropping
//! sequence numbers they have already applied.

mod bus;
mod event;
mod normalizer;
mod sink;

pub use bus::{ActivityBus, ActivityStream};
pub use event::{
    ActivityEvent, ActivitySnapshot, ActivityStatus, STAGE_FINALIZE, STAGE_GENERATE,
    STAGE_PREPARE, STAGE_SUPERSEDED,
};
pub use normalizer::{ActivityNormalizer, MAX_EVENTS_PER_RUN, MAX_STAGE_UPDATES, RawSignal};
pub use sink::{ActivitySink, ChannelSink, MemorySink, RunScoped, StdOutSink};
