use std::time::Duration;

/// Replay buffers below this size would lose the opening of a normal run
/// before a late subscriber attaches.
pub const MIN_REPLAY_CAPACITY: usize = 6;

/// Tunables for the rebuild worker and the activity bus it publishes to.
///
/// Environment overrides are read from `FLOWSMITH_*` variables via
/// [`PipelineConfig::from_env`]; unset or unparsable values fall back to the
/// defaults.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Total attempts per job, including the first. Transient builder
    /// failures retry while attempts remain.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt, plus jitter.
    pub backoff_base: Duration,
    /// Events retained per run for late-subscriber replay.
    pub replay_capacity: usize,
    /// How long a completed run's channel stays available for replay.
    pub eviction_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: Duration::from_millis(500),
            replay_capacity: 32,
            eviction_grace: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `FLOWSMITH_MAX_ATTEMPTS`,
    /// `FLOWSMITH_BACKOFF_BASE_MS`, `FLOWSMITH_REPLAY_CAPACITY`, and
    /// `FLOWSMITH_EVICTION_GRACE_SECS`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(v) = env_parse::<u32>("FLOWSMITH_MAX_ATTEMPTS") {
            config.max_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("FLOWSMITH_BACKOFF_BASE_MS") {
            config.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("FLOWSMITH_REPLAY_CAPACITY") {
            config.replay_capacity = v.max(MIN_REPLAY_CAPACITY);
        }
        if let Some(v) = env_parse::<u64>("FLOWSMITH_EVICTION_GRACE_SECS") {
            config.eviction_grace = Duration::from_secs(v);
        }
        config
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    #[must_use]
    pub fn with_replay_capacity(mut self, replay_capacity: usize) -> Self {
        self.replay_capacity = replay_capacity.max(MIN_REPLAY_CAPACITY);
        self
    }

    #[must_use]
    pub fn with_eviction_grace(mut self, eviction_grace: Duration) -> Self {
        self.eviction_grace = eviction_grace;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.parse().ok())
}
