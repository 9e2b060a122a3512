//! Per-run event fan-out with snapshot-plus-replay subscription.
//!
//! Each run owns a tokio broadcast channel plus a bounded replay buffer. The
//! bus is the single writer that stamps `seq`: publishing takes the run lock,
//! assigns the next sequence number, appends to the replay buffer, and only
//! then fans out to live subscribers and global sinks. A subscriber that
//! attaches mid-run gets an [`ActivitySnapshot`] of the buffered history and
//! a live [`ActivityStream`]; the two may overlap, which is why clients
//! reconcile on `seq`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::stream;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::time::timeout;

use super::event::{ActivityEvent, ActivitySnapshot, ActivityStatus};
use super::sink::ActivitySink;

/// Default number of events retained per run for replay.
pub const DEFAULT_REPLAY_CAPACITY: usize = 32;

#[derive(Debug)]
struct RunChannel {
    next_seq: u64,
    buffer: VecDeque<ActivityEvent>,
    sender: Sender<ActivityEvent>,
    stage: Option<String>,
    status: Option<ActivityStatus>,
    last_event: Option<ActivityEvent>,
    completed_at: Option<Instant>,
}

impl RunChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            next_seq: 1,
            buffer: VecDeque::with_capacity(capacity),
            sender,
            stage: None,
            status: None,
            last_event: None,
            completed_at: None,
        }
    }

    fn snapshot(&self, run_id: &str) -> ActivitySnapshot {
        ActivitySnapshot {
            run_id: run_id.to_owned(),
            stage: self.stage.clone(),
            status: self.status,
            last_event: self.last_event.clone(),
            events: self.buffer.iter().cloned().collect(),
        }
    }
}

/// Fan-out hub for run progress. Shared via `Arc`; one per process.
pub struct ActivityBus {
    runs: Mutex<FxHashMap<String, RunChannel>>,
    sinks: Mutex<Vec<Box<dyn ActivitySink>>>,
    replay_capacity: usize,
    dropped_events: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ActivityBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityBus")
            .field("replay_capacity", &self.replay_capacity)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

impl ActivityBus {
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            runs: Mutex::new(FxHashMap::default()),
            sinks: Mutex::new(Vec::new()),
            replay_capacity: replay_capacity.max(1),
            dropped_events: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a global sink that receives every published event across all
    /// runs, after sequence stamping.
    pub fn add_sink(&self, sink: impl ActivitySink + 'static) {
        self.sinks
            .lock()
            .expect("activity bus sink lock poisoned")
            .push(Box::new(sink));
    }

    /// Stamp `event` with the run's next sequence number, buffer it, and fan
    /// it out. Returns the stamped event.
    ///
    /// Publishing to a run nobody subscribes to is not an error; the event
    /// still lands in the replay buffer for late subscribers.
    pub fn publish(&self, mut event: ActivityEvent) -> ActivityEvent {
        {
            let mut runs = self.runs.lock().expect("activity bus run lock poisoned");
            let channel = runs
                .entry(event.run_id.clone())
                .or_insert_with(|| RunChannel::new(self.replay_capacity));

            event.seq = channel.next_seq;
            channel.next_seq += 1;

            channel.stage = Some(event.stage.clone());
            channel.status = Some(event.status);
            channel.last_event = Some(event.clone());
            channel.buffer.push_back(event.clone());
            while channel.buffer.len() > self.replay_capacity {
                channel.buffer.pop_front();
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }

            // SendError just means no live subscriber right now.
            let _ = channel.sender.send(event.clone());
        }

        let mut sinks = self.sinks.lock().expect("activity bus sink lock poisoned");
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.handle(&event) {
                tracing::warn!(run = %event.run_id, error = %err, "activity sink write failed");
            }
        }

        event
    }

    /// Attach to a run: snapshot of buffered history plus a live stream.
    ///
    /// Creates the run channel if it does not exist yet, so a client may
    /// subscribe before the worker publishes anything.
    pub fn subscribe(&self, run_id: &str) -> (ActivitySnapshot, ActivityStream) {
        let mut runs = self.runs.lock().expect("activity bus run lock poisoned");
        let channel = runs
            .entry(run_id.to_owned())
            .or_insert_with(|| RunChannel::new(self.replay_capacity));
        let snapshot = channel.snapshot(run_id);
        let stream = ActivityStream {
            receiver: channel.sender.subscribe(),
            dropped: Arc::clone(&self.dropped_events),
        };
        (snapshot, stream)
    }

    /// Current snapshot for a run, without subscribing. Empty default when
    /// the run is unknown.
    pub fn snapshot(&self, run_id: &str) -> ActivitySnapshot {
        let runs = self.runs.lock().expect("activity bus run lock poisoned");
        runs.get(run_id)
            .map(|c| c.snapshot(run_id))
            .unwrap_or_else(|| ActivitySnapshot {
                run_id: run_id.to_owned(),
                ..ActivitySnapshot::default()
            })
    }

    /// Mark a run finished. Its channel stays around for late subscribers
    /// until [`evict_expired`](Self::evict_expired) reaps it.
    pub fn complete_run(&self, run_id: &str) {
        let mut runs = self.runs.lock().expect("activity bus run lock poisoned");
        if let Some(channel) = runs.get_mut(run_id) {
            channel.completed_at = Some(Instant::now());
        }
    }

    /// Drop completed runs older than `grace`. Returns how many were evicted.
    pub fn evict_expired(&self, grace: Duration) -> usize {
        let mut runs = self.runs.lock().expect("activity bus run lock poisoned");
        let before = runs.len();
        runs.retain(|_, channel| {
            channel
                .completed_at
                .is_none_or(|at| at.elapsed() < grace)
        });
        before - runs.len()
    }

    /// Events dropped from replay buffers or missed by lagged subscribers.
    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// Live subscription to one run's events.
#[derive(Debug)]
pub struct ActivityStream {
    receiver: Receiver<ActivityEvent>,
    dropped: Arc<AtomicUsize>,
}

impl ActivityStream {
    pub async fn recv(&mut self) -> Result<ActivityEvent, broadcast::error::RecvError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.dropped.fetch_add(missed as usize, Ordering::Relaxed);
                Err(broadcast::error::RecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    pub fn try_recv(&mut self) -> Result<ActivityEvent, broadcast::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                self.dropped.fetch_add(missed as usize, Ordering::Relaxed);
                Err(broadcast::error::TryRecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    /// Next event within `duration`, skipping over lag gaps. `None` on
    /// timeout or when the run channel closes.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<ActivityEvent> {
        loop {
            match timeout(duration, self.recv()).await {
                Ok(Ok(event)) => return Some(event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }

    /// Adapt to a `futures_util::Stream`, silently skipping lag gaps.
    pub fn into_async_stream(self) -> impl futures_util::stream::Stream<Item = ActivityEvent> {
        stream::unfold(self, |mut stream| async move {
            loop {
                match stream.recv().await {
                    Ok(event) => return Some((event, stream)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}
