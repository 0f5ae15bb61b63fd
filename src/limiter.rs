//! Admission controller for one named upstream service.
//!
//! A [`Limiter`] owns a current [`MinuteBucket`], a pool of parked callers,
//! and the adaptive pause state that reacts to upstream throttling. All
//! mutation happens under a single mutex (§5); callers only ever block on a
//! [`crate::waiter::Waiter`] after that mutex has been released.

use crate::bucket::SecondBucket;
use crate::clock::{epoch_seconds, iso_timestamp};
use crate::minute::{MinuteBucket, RampParameters};
use crate::ticket::Ticket;
use crate::waiter::{park, WaiterRegistry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Initial, and post-resume, probe interval.
const MIN_PROBE_INTERVAL_SECS: f64 = 10.0;
/// Ceiling the probe interval backs off to.
const MAX_PROBE_INTERVAL_SECS: f64 = 65.0;
/// Multiplier applied to the probe interval each time the probe finds the
/// upstream still blocked.
const PROBE_BACKOFF_RATE: f64 = 1.5;
/// Retry budget handed to [`crate::wrapper`] callers (§4.7).
pub const RATE_LIMIT_RETRIES: u32 = 20;

/// Predicate, supplied by the caller, that answers whether the upstream
/// service this limiter governs is still rejecting requests.
///
/// Modelled as a dependency-injected closure rather than a back-pointer
/// between the limiter and its service (design note, §9): exceptions raised
/// out of the closure are treated as "still blocked", per §7.
pub type IsBlocked = Arc<dyn Fn() -> bool + Send + Sync>;

struct LimiterState {
    next_request_id: u64,
    current_minute: Option<MinuteBucket>,
    paused: bool,
    waiters: WaiterRegistry,
    probe_interval_secs: f64,
}

/// Admission controller for one named upstream (or model family).
///
/// Cheap to clone: internally reference-counted, the same way
/// `InMemoryRatelimiter` is in the sibling HTTP ratelimiter crate. Every
/// clone shares the same buckets, waiters, and pause state.
#[derive(Clone)]
pub struct Limiter {
    name: Arc<str>,
    ramp: RampParameters,
    state: Arc<Mutex<LimiterState>>,
    is_blocked: IsBlocked,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("name", &self.name)
            .field("ramp", &self.ramp)
            .finish_non_exhaustive()
    }
}

impl Limiter {
    /// Construct a limiter for `requests_per_minute` requests/minute.
    ///
    /// Degenerate case: below 60 requests/minute, ramping isn't worth
    /// optimising for (per §4.3) and max/start/delta are all pinned to 1.
    /// Otherwise `max_per_second = floor(R / 60)`, `start_ramp =
    /// max(1, round(R/60 * 0.25))`, `delta = max(1, round(R/60 * 0.10))`.
    ///
    /// `is_blocked` is polled by the adaptive probe (§4.5) once this limiter
    /// has entered the paused state; it should ask the upstream service
    /// whether throttling has cleared.
    ///
    /// This constructor does not register the limiter with any
    /// [`crate::monitor::Monitor`] — use [`crate::monitor::Monitor::limiter`]
    /// to build one that the monitor's 1 Hz tick actually drives. A bare
    /// `Limiter` is still fully functional on its own (useful for the unit
    /// tests in this crate): its minute bucket is lazily created on first use
    /// and must be advanced manually via [`Self::release_tickets`] /
    /// [`Self::refresh_minute`].
    #[must_use]
    pub fn new(
        name: impl Into<Arc<str>>,
        requests_per_minute: u64,
        is_blocked: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        let ramp = if requests_per_minute < 60 {
            RampParameters {
                max_per_second: 1,
                start_ramp: 1,
                delta: 1,
            }
        } else {
            let per_second = requests_per_minute as f64 / 60.0;
            RampParameters {
                max_per_second: requests_per_minute / 60,
                start_ramp: ((per_second * 0.25).round() as u64).max(1),
                delta: ((per_second * 0.10).round() as u64).max(1),
            }
        };

        Self {
            name: name.into(),
            ramp,
            state: Arc::new(Mutex::new(LimiterState {
                next_request_id: 0,
                current_minute: None,
                paused: false,
                waiters: WaiterRegistry::default(),
                probe_interval_secs: MIN_PROBE_INTERVAL_SECS,
            })),
            is_blocked: Arc::new(is_blocked),
        }
    }

    /// The name this limiter was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ramp parameters derived at construction time.
    #[must_use]
    pub fn ramp(&self) -> RampParameters {
        self.ramp
    }

    /// Whether the limiter is currently in the paused state (§4.5).
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("limiter poisoned").paused
    }

    fn ensure_minute(state: &mut LimiterState, ramp: RampParameters, name: &str) {
        if state.current_minute.is_none() {
            let now = epoch_seconds();
            state.current_minute = Some(MinuteBucket::new(
                name.to_owned(),
                now,
                iso_timestamp(now),
                ramp,
                ramp.start_ramp,
            ));
        }
    }

    /// Request a ticket for one admission. Blocks the calling thread until
    /// inventory is available if none currently is (§4.3).
    #[must_use]
    pub fn acquire(&self, correlation_id: Option<String>, model_name: Option<String>) -> Ticket {
        let mut state = self.state.lock().expect("limiter poisoned");
        Self::ensure_minute(&mut state, self.ramp, &self.name);
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        let minute = state.current_minute.as_mut().expect("minute just ensured");
        let ticket = minute.acquire(request_id, correlation_id, model_name);

        if ticket.has_issued_ticket() {
            #[cfg(feature = "tracing")]
            tracing::debug!(limiter = %self.name, request_id, "ticket issued immediately");
            return ticket;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(limiter = %self.name, request_id, "ticket parked, no inventory");
        let handle = state.waiters.register(request_id);
        drop(state);
        park(&handle)
    }

    /// Report that `ticket`'s request completed normally.
    pub fn return_ticket(&self, ticket: Ticket) {
        let mut state = self.state.lock().expect("limiter poisoned");
        Self::ensure_minute(&mut state, self.ramp, &self.name);
        state
            .current_minute
            .as_mut()
            .expect("minute just ensured")
            .finish(ticket);
    }

    /// Report that `ticket`'s request was rejected upstream with a 429/529.
    ///
    /// Enters the paused state (scheduling a probe if not already paused)
    /// and blocks until the ticket is reissued once inventory allows.
    #[must_use]
    pub fn rate_limit_exceeded(&self, ticket: Ticket) -> Ticket {
        let (handle, should_schedule) = {
            let mut state = self.state.lock().expect("limiter poisoned");
            Self::ensure_minute(&mut state, self.ramp, &self.name);
            let request_id = ticket.request_id;
            let minute = state.current_minute.as_mut().expect("minute just ensured");
            // finish the old ticket for throughput accounting before
            // add_rate_limit clears its issuance fields (§9 open question).
            minute.finish(ticket.clone());
            minute.add_rate_limit(ticket);

            let should_schedule = !state.paused;
            state.paused = true;
            let handle = state.waiters.register(request_id);
            (handle, should_schedule)
        };

        if should_schedule {
            #[cfg(feature = "tracing")]
            tracing::debug!(limiter = %self.name, "entering paused state, scheduling probe");
            self.schedule_probe();
        }

        park(&handle)
    }

    fn schedule_probe(&self) {
        let interval = self.state.lock().expect("limiter poisoned").probe_interval_secs;
        let limiter = self.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(interval));
            limiter.probe_tick();
        });
    }

    fn probe_tick(&self) {
        // A panicking predicate is treated as "still blocked" (§7): we must
        // not accidentally clear the pause because a probe crashed.
        let blocked = catch_unwind(AssertUnwindSafe(|| (self.is_blocked)())).unwrap_or(true);

        if blocked {
            let mut state = self.state.lock().expect("limiter poisoned");
            state.probe_interval_secs = (state.probe_interval_secs * PROBE_BACKOFF_RATE).min(MAX_PROBE_INTERVAL_SECS);
            drop(state);
            #[cfg(feature = "tracing")]
            tracing::debug!(limiter = %self.name, "probe still blocked, backing off");
            self.schedule_probe();
        } else {
            let mut state = self.state.lock().expect("limiter poisoned");
            state.paused = false;
            state.probe_interval_secs = MIN_PROBE_INTERVAL_SECS;
            #[cfg(feature = "tracing")]
            tracing::debug!(limiter = %self.name, "probe unblocked, resuming");
        }
    }

    /// Called by the monitor on `start` (§4.6): establish a fresh minute at
    /// index 0 regardless of whatever minute, if any, was already current.
    /// Does not touch the paused flag or waiter registry.
    pub(crate) fn start_fresh_minute(&self, now_epoch_seconds: i64, now_iso: &str) {
        let mut state = self.state.lock().expect("limiter poisoned");
        state.current_minute = Some(MinuteBucket::new(
            self.name.to_string(),
            now_epoch_seconds,
            now_iso.to_owned(),
            self.ramp,
            self.ramp.start_ramp,
        ));
    }

    /// Called by the monitor at minute rollover (§4.6). Computes the new
    /// minute's first-bucket inventory, carries over unsatisfied requests
    /// from the retiring minute, signals every promoted waiter, and returns
    /// the retiring [`MinuteBucket`] for the log writer.
    pub(crate) fn refresh_minute(&self, now_epoch_seconds: i64, now_iso: &str) -> Option<MinuteBucket> {
        let (retiring, released) = {
            let mut state = self.state.lock().expect("limiter poisoned");
            let first_bucket_ticket_count = if state.paused {
                0
            } else {
                let prior_tail = state.current_minute.as_ref().map(MinuteBucket::current_issued_count);
                prior_tail.unwrap_or(self.ramp.start_ramp).max(self.ramp.start_ramp)
            };

            let mut next = MinuteBucket::new(
                self.name.to_string(),
                now_epoch_seconds,
                now_iso.to_owned(),
                self.ramp,
                first_bucket_ticket_count,
            );
            let released = next.transfer_from(state.current_minute.as_mut());
            let retiring = state.current_minute.replace(next);

            for ticket in &released {
                state.waiters.resolve(ticket.clone());
            }

            (retiring, released)
        };
        let _ = released;
        retiring
    }

    /// Called by the monitor on every non-rollover tick (§4.6). Advances the
    /// current minute by one second (skipping ramp replenishment while
    /// paused) and drains overflow/rate-limited carry-over into the new
    /// second, signalling every promoted waiter. Returns the retired
    /// [`SecondBucket`] for listener notification.
    pub(crate) fn release_tickets(&self) -> Option<SecondBucket> {
        let mut state = self.state.lock().expect("limiter poisoned");
        Self::ensure_minute(&mut state, self.ramp, &self.name);

        let retired_index = state.current_minute.as_ref().expect("minute just ensured").current_index;
        let retired = state.current_minute.as_ref().expect("minute just ensured").seconds[retired_index].clone();

        let paused = state.paused;
        let minute = state.current_minute.as_mut().expect("minute just ensured");
        minute.advance(!paused);
        let released = minute.release_tickets();

        for ticket in released {
            state.waiters.resolve(ticket);
        }

        Some(retired)
    }

    /// A clone of the current minute bucket, for flushing on
    /// [`crate::monitor::Monitor::stop`].
    pub(crate) fn snapshot_current_minute(&self) -> Option<MinuteBucket> {
        self.state.lock().expect("limiter poisoned").current_minute.clone()
    }
}
