//! Process-wide singleton that drives every [`Limiter`] at 1 Hz and persists
//! retiring minutes to the log.
//!
//! Mirrors the shape of the sibling HTTP ratelimiter's background queue task
//! (one dedicated thread, a registry behind a single lock) generalised from
//! "one bucket per route" to "one bucket-hierarchy per named limiter", and
//! adding the log writer and listener fan-out §4.6/§6 call for.

use crate::bucket::SecondBucket;
use crate::clock::{epoch_seconds, iso_timestamp};
use crate::limiter::Limiter;
use crate::minute::MinuteBucket;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_DIR_ENV_VAR: &str = "RATELLMITER_LOGS";
const DEFAULT_LOG_DIR: &str = "ratellmiter_logs";
/// Name under which [`Monitor::limiter`]'s caller-omitted default limiter is
/// registered, should one be configured via [`Monitor::config`].
const DEFAULT_LIMITER_NAME: &str = "default";

/// A callback invoked synchronously, from the ticker thread, with each
/// retiring [`SecondBucket`] (§6's listener callback).
///
/// Must not block significantly: it runs inline with every other limiter's
/// tick. Panics are caught and logged rather than allowed to take down the
/// ticker thread.
pub type Listener = Arc<dyn Fn(&SecondBucket) + Send + Sync>;

static MONITOR: OnceCell<Monitor> = OnceCell::new();

struct MonitorState {
    configured: bool,
    log_directory: Option<PathBuf>,
    default_rate_limit: Option<u64>,
    limiters: HashMap<Arc<str>, Limiter>,
    ever_seen_traffic: HashSet<Arc<str>>,
    listeners: Vec<Listener>,
    second_index: usize,
    log_file: Option<Arc<Mutex<BufWriter<File>>>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            configured: false,
            log_directory: None,
            default_rate_limit: None,
            limiters: HashMap::new(),
            ever_seen_traffic: HashSet::new(),
            listeners: Vec::new(),
            second_index: 0,
            log_file: None,
        }
    }
}

/// Process-wide ticket-scheduler driver.
///
/// Accessed only through [`Monitor::global`]; there is deliberately no way
/// to construct a second one (§6, §9 "Singleton monitor").
pub struct Monitor {
    state: Mutex<MonitorState>,
    running: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            running: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }
    }

    /// The single process-wide instance, created lazily on first access.
    #[must_use]
    pub fn global() -> &'static Monitor {
        MONITOR.get_or_init(Monitor::new)
    }

    /// Configure the log directory and default limiter rate ahead of
    /// [`Self::start`]. Safe to call more than once; each call simply
    /// overwrites the previous configuration, as long as it happens before
    /// `start` (§10.2).
    pub fn config(&self, log_directory: Option<PathBuf>, default_rate_limit: Option<u64>) {
        let mut state = self.state.lock().expect("monitor poisoned");
        state.log_directory = log_directory;
        state.default_rate_limit = default_rate_limit;
        state.configured = true;
    }

    fn resolve_log_directory(state: &MonitorState) -> PathBuf {
        if let Some(dir) = &state.log_directory {
            return dir.clone();
        }
        if let Ok(from_env) = std::env::var(LOG_DIR_ENV_VAR) {
            return PathBuf::from(from_env);
        }
        PathBuf::from(DEFAULT_LOG_DIR)
    }

    /// Register `limiter` for ticking and logging. Idempotent per name: a
    /// second registration under the same name replaces the first.
    pub fn register(&self, limiter: Limiter) {
        let mut state = self.state.lock().expect("monitor poisoned");
        state.limiters.insert(Arc::from(limiter.name()), limiter);
    }

    /// Build a [`Limiter`] and register it with this monitor in one step
    /// (§6 "limiters register themselves with the monitor on construction").
    #[must_use]
    pub fn limiter(
        &self,
        name: impl Into<Arc<str>>,
        requests_per_minute: u64,
        is_blocked: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Limiter {
        let name = name.into();
        let limiter = Limiter::new(Arc::clone(&name), requests_per_minute, is_blocked);
        self.register(limiter.clone());
        limiter
    }

    /// The default limiter configured via [`Self::config`]'s
    /// `default_rate_limit`, creating it on first request if one was
    /// configured but not yet materialised.
    #[must_use]
    pub fn default_limiter(&self) -> Option<Limiter> {
        let mut state = self.state.lock().expect("monitor poisoned");
        if let Some(existing) = state.limiters.get(DEFAULT_LIMITER_NAME) {
            return Some(existing.clone());
        }
        let rpm = state.default_rate_limit?;
        let limiter = Limiter::new(DEFAULT_LIMITER_NAME, rpm, || false);
        state
            .limiters
            .insert(Arc::from(DEFAULT_LIMITER_NAME), limiter.clone());
        Some(limiter)
    }

    /// Register a listener to be invoked with every retiring [`SecondBucket`]
    /// (§6).
    pub fn add_listener(&self, listener: Listener) {
        self.state.lock().expect("monitor poisoned").listeners.push(listener);
    }

    /// Whether the ticker is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drop every registered limiter and listener, and reset log/config
    /// state to its just-constructed defaults.
    ///
    /// `Monitor` is a process-wide singleton (§9), so a test binary with
    /// several `#[test]` functions that each call [`Self::global`] shares one
    /// instance. Call this (while stopped) between such tests so each one
    /// sees a clean limiter/listener registry instead of accumulating state
    /// left behind by whichever test ran before it. Not meant for use outside
    /// tests.
    ///
    /// # Panics
    ///
    /// Panics if the ticker is currently running.
    pub fn reset_for_tests(&self) {
        assert!(!self.is_running(), "reset_for_tests called while the monitor is still running");
        *self.state.lock().expect("monitor poisoned") = MonitorState::default();
    }

    /// Begin ticking. Self-configures with defaults if [`Self::config`] was
    /// never called. Idempotent: calling `start` while already running is a
    /// no-op.
    pub fn start(&'static self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let now = epoch_seconds();
        let iso = iso_timestamp(now);

        let log_file = {
            let mut state = self.state.lock().expect("monitor poisoned");
            if !state.configured {
                state.configured = true;
            }
            let dir = Self::resolve_log_directory(&state);
            state.second_index = 0;
            for limiter in state.limiters.values() {
                limiter.start_fresh_minute(now, &iso);
            }

            match Self::open_log_file(&dir, now) {
                Ok(file) => Some(Arc::new(Mutex::new(file))),
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%error, directory = %dir.display(), "failed to open ratellmiter log file; logging disabled this run");
                    #[cfg(not(feature = "tracing"))]
                    let _ = error;
                    None
                }
            }
        };

        self.state.lock().expect("monitor poisoned").log_file = log_file;

        let handle = thread::spawn(move || {
            while self.running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_secs(1));
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                self.tick();
            }
        });
        *self.ticker.lock().expect("monitor poisoned") = Some(handle);
    }

    fn open_log_file(dir: &std::path::Path, start_epoch_seconds: i64) -> std::io::Result<BufWriter<File>> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{start_epoch_seconds}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn tick(&self) {
        let now = epoch_seconds();
        let iso = iso_timestamp(now);

        let (rollover, limiters): (bool, Vec<Limiter>) = {
            let mut state = self.state.lock().expect("monitor poisoned");
            state.second_index = (state.second_index + 1) % 60;
            (state.second_index == 0, state.limiters.values().cloned().collect())
        };

        if rollover {
            for limiter in &limiters {
                if let Some(retiring) = limiter.refresh_minute(now, &iso) {
                    self.maybe_log_minute(limiter.name(), retiring);
                }
            }
        } else {
            for limiter in &limiters {
                if let Some(retired_second) = limiter.release_tickets() {
                    self.notify_listeners(&retired_second);
                }
            }
        }
    }

    fn maybe_log_minute(&self, limiter_name: &str, minute: MinuteBucket) {
        let mut state = self.state.lock().expect("monitor poisoned");
        let had_activity = minute.seconds.iter().any(SecondBucket::had_activity);
        let name: Arc<str> = Arc::from(limiter_name);
        if had_activity {
            state.ever_seen_traffic.insert(Arc::clone(&name));
        }
        if !state.ever_seen_traffic.contains(&name) {
            return;
        }
        let Some(log_file) = state.log_file.clone() else {
            return;
        };
        drop(state);
        Self::write_minute(&log_file, &minute);
    }

    fn write_minute(log_file: &Arc<Mutex<BufWriter<File>>>, minute: &MinuteBucket) {
        let line = match serde_json::to_string(minute) {
            Ok(line) => line,
            Err(_error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_error, "failed to serialize minute bucket, dropping log line");
                return;
            }
        };
        let mut writer = log_file.lock().expect("log file poisoned");
        let write_failed = writeln!(writer, "{line}").is_err();
        let flush_failed = writer.flush().is_err();
        if write_failed || flush_failed {
            #[cfg(feature = "tracing")]
            tracing::warn!("failed to write ratellmiter log line");
        }
    }

    fn notify_listeners(&self, second: &SecondBucket) {
        let listeners = self.state.lock().expect("monitor poisoned").listeners.clone();
        for listener in &listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(second)));
            if result.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!("listener panicked while handling retired second bucket");
            }
        }
    }

    /// Stop ticking, flush every limiter's current minute to the log
    /// unconditionally (even if it never saw traffic — this is a final
    /// snapshot, not a per-tick append), and join the ticker thread.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.ticker.lock().expect("monitor poisoned").take() {
            let _ = handle.join();
        }

        let (limiters, log_file) = {
            let state = self.state.lock().expect("monitor poisoned");
            (state.limiters.values().cloned().collect::<Vec<_>>(), state.log_file.clone())
        };
        let Some(log_file) = log_file else {
            return;
        };
        for limiter in limiters {
            if let Some(minute) = limiter.snapshot_current_minute() {
                Self::write_minute(&log_file, &minute);
            }
        }
    }
}
