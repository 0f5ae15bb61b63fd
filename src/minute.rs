//! A minute's worth of [`SecondBucket`]s, plus the ramp parameters that
//! govern how each new second's inventory is set.

use crate::bucket::SecondBucket;
use crate::ticket::Ticket;
use serde::{Deserialize, Serialize};

/// Ramp parameters derived from a limiter's requests-per-minute figure.
///
/// See [`crate::limiter::Limiter::new`] for how these are derived; kept as
/// their own type so [`MinuteBucket`] doesn't need to borrow from the
/// limiter that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampParameters {
    /// Steady-state maximum tickets issuable per second.
    pub max_per_second: u64,
    /// Inventory a cold (or just-unpaused) bucket starts at.
    pub start_ramp: u64,
    /// Increment applied to inventory each successive second while ramping.
    pub delta: u64,
}

/// An ordered sequence of 60 [`SecondBucket`]s representing one minute of
/// history for one limiter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinuteBucket {
    /// Name of the limiter that owns this minute.
    pub limiter_name: String,
    /// ISO-8601 wall-clock timestamp at which this minute started.
    pub start_iso: String,
    /// Epoch-seconds at which this minute started (`second_bucket[0].second_id`).
    pub start_epoch_seconds: i64,
    /// Ramp parameters in effect for this minute.
    pub ramp: RampParameters,
    /// Total `acquire` calls seen across the minute so far.
    pub requested_count: u64,
    /// Total `finish` calls seen across the minute so far.
    pub finished_count: u64,
    /// Index in `[0, 59]` of the only mutable bucket.
    pub current_index: usize,
    /// The 60 one-second slots, in order, starting at `start_epoch_seconds`.
    pub seconds: Vec<SecondBucket>,
}

impl MinuteBucket {
    /// Construct a fresh minute starting at `start_epoch_seconds`/`start_iso`
    /// (both computed once by the monitor per tick, per §4.6), with bucket 0
    /// seeded with `first_bucket_ticket_count` inventory.
    #[must_use]
    pub fn new(
        limiter_name: String,
        start_epoch_seconds: i64,
        start_iso: String,
        ramp: RampParameters,
        first_bucket_ticket_count: u64,
    ) -> Self {
        let mut seconds = Vec::with_capacity(60);
        for offset in 0..60i64 {
            seconds.push(SecondBucket::new(start_epoch_seconds + offset));
        }
        seconds[0].ticket_count = first_bucket_ticket_count;

        Self {
            limiter_name,
            start_iso,
            start_epoch_seconds,
            ramp,
            requested_count: 0,
            finished_count: 0,
            current_index: 0,
            seconds,
        }
    }

    /// The bucket currently accepting new activity.
    #[must_use]
    pub fn current(&self) -> &SecondBucket {
        &self.seconds[self.current_index]
    }

    fn current_mut(&mut self) -> &mut SecondBucket {
        &mut self.seconds[self.current_index]
    }

    /// Number of tickets issued by the current bucket, used as the next
    /// bucket's ramp carry-over basis.
    #[must_use]
    pub fn current_issued_count(&self) -> u64 {
        self.current().issued_count
    }

    /// Record a fresh arrival against the current bucket.
    pub(crate) fn acquire(
        &mut self,
        request_id: u64,
        correlation_id: Option<String>,
        model_name: Option<String>,
    ) -> Ticket {
        self.requested_count += 1;
        self.current_mut().acquire(request_id, correlation_id, model_name)
    }

    /// Finish `ticket` against the current bucket.
    pub(crate) fn finish(&mut self, ticket: Ticket) {
        self.finished_count += 1;
        self.current_mut().finish(ticket);
    }

    /// Record an upstream throttle against `ticket` on the current bucket.
    pub(crate) fn add_rate_limit(&mut self, ticket: Ticket) {
        self.current_mut().add_rate_limit(ticket);
    }

    /// Advance to the next second, saturating at index 59.
    ///
    /// Unless `set_ticket_count` is `false` (the limiter is paused), the new
    /// current bucket's inventory is computed from the retiring bucket's
    /// issuance via [`SecondBucket::set_ticket_count`].
    pub(crate) fn advance(&mut self, set_ticket_count: bool) {
        let retiring_issued = self.current().issued_count;
        self.current_index = (self.current_index + 1).min(59);
        if set_ticket_count {
            let ramp = self.ramp;
            self.current_mut()
                .set_ticket_count(ramp.max_per_second, ramp.start_ramp, retiring_issued, ramp.delta);
        }
    }

    /// Drain overflow and rate-limited carry-over from the previous second
    /// (`current_index - 1`) into the now-current bucket.
    ///
    /// Returns the tickets promoted, so their waiters can be signalled.
    pub(crate) fn release_tickets(&mut self) -> Vec<Ticket> {
        let prev_index = self.current_index - 1;
        let overflow = std::mem::take(&mut self.seconds[prev_index].overflow);
        let rate_limited = std::mem::take(&mut self.seconds[prev_index].rate_limited);
        self.current_mut().transfer_from(overflow, rate_limited)
    }

    /// On construction of a fresh minute, drain the previous minute's tail
    /// bucket's overflow and rate-limited carry-over into bucket 0.
    ///
    /// Returns the tickets promoted, so their waiters can be signalled.
    pub(crate) fn transfer_from(&mut self, previous: Option<&mut MinuteBucket>) -> Vec<Ticket> {
        let Some(previous) = previous else {
            return Vec::new();
        };
        let tail = previous.current_index;
        let overflow = std::mem::take(&mut previous.seconds[tail].overflow);
        let rate_limited = std::mem::take(&mut previous.seconds[tail].rate_limited);
        self.seconds[0].transfer_from(overflow, rate_limited)
    }
}
