//! Output targets hanging off the [`ActivityBus`](super::ActivityBus).
//!
//! A sink sees every event the bus publishes, after sequence stamping, and
//! decides what to do with it: print it for an operator, buffer it for
//! inspection, or forward it to an async consumer. Sinks are process-wide;
//! [`ActivitySink::scoped_to`] narrows one to a single rebuild when the
//! consumer only cares about the run it is watching.

use std::io::{self, Stdout, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::event::ActivityEvent;
use crate::telemetry::{PlainFormatter, TelemetryFormatter};

/// Consumer of stamped activity events.
pub trait ActivitySink: Send + Sync {
    fn handle(&mut self, event: &ActivityEvent) -> io::Result<()>;

    /// Narrow this sink to the events of one run.
    fn scoped_to(self, run_id: impl Into<String>) -> RunScoped<Self>
    where
        Self: Sized,
    {
        RunScoped {
            run_id: run_id.into(),
            inner: self,
        }
    }
}

/// Sink wrapper that drops events from every run but one.
///
/// Built via [`ActivitySink::scoped_to`]; events for other runs are
/// acknowledged without touching the wrapped sink.
pub struct RunScoped<S> {
    run_id: String,
    inner: S,
}

impl<S: ActivitySink> ActivitySink for RunScoped<S> {
    fn handle(&mut self, event: &ActivityEvent) -> io::Result<()> {
        if event.run_id == self.run_id {
            self.inner.handle(event)
        } else {
            Ok(())
        }
    }
}

/// Operator-facing terminal sink, one rendered line per event.
pub struct StdOutSink<F: TelemetryFormatter = PlainFormatter> {
    out: Stdout,
    formatter: F,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self::with_formatter(PlainFormatter::new())
    }
}

impl<F: TelemetryFormatter> StdOutSink<F> {
    pub fn with_formatter(formatter: F) -> Self {
        Self {
            out: io::stdout(),
            formatter,
        }
    }
}

impl<F: TelemetryFormatter> ActivitySink for StdOutSink<F> {
    fn handle(&mut self, event: &ActivityEvent) -> io::Result<()> {
        let render = self.formatter.render_event(event);
        let mut out = self.out.lock();
        for line in &render.lines {
            out.write_all(line.as_bytes())?;
        }
        out.flush()
    }
}

/// Buffering sink for tests and snapshot inspection.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<ActivityEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far, across all runs, in publish order.
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.entries
            .lock()
            .expect("memory sink lock poisoned")
            .clone()
    }

    /// Captured events for one run, in publish order.
    pub fn events_for(&self, run_id: &str) -> Vec<ActivityEvent> {
        self.entries
            .lock()
            .expect("memory sink lock poisoned")
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("memory sink lock poisoned")
            .clear();
    }
}

impl ActivitySink for MemorySink {
    fn handle(&mut self, event: &ActivityEvent) -> io::Result<()> {
        self.entries
            .lock()
            .expect("memory sink lock poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events into a tokio mpsc channel for async consumers, such as
/// an SSE handler streaming one run's progress to a browser.
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use flowsmith::activity::{ActivityBus, ActivitySink, ChannelSink};
///
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let bus = ActivityBus::default();
/// bus.add_sink(ChannelSink::new(tx).scoped_to("run-7"));
/// // rx now yields only run-7's events as they are published.
/// ```
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ActivityEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ActivityEvent>) -> Self {
        Self { tx }
    }
}

impl ActivitySink for ChannelSink {
    fn handle(&mut self, event: &ActivityEvent) -> io::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "event consumer hung up"))
    }
}
