//! Admission-request records.
//!
//! A [`Ticket`] is the unit the rest of the crate schedules: it is created by
//! [`crate::bucket::SecondBucket::acquire`], may spend time in an overflow or
//! rate-limited list before being issued, and is closed out by
//! [`crate::bucket::SecondBucket::finish`]. [`RateLimitEvent`] records one
//! upstream throttle and its eventual resolution.

use serde::{Deserialize, Serialize};

/// One upstream 429/529 rejection and its eventual reissue.
///
/// `reissued_in_second` is `None` while the ticket is still waiting to be
/// reissued, and is set exactly once, by
/// [`Ticket::resolve_rate_limit`], to a second id strictly greater than
/// `limited_in_second`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    /// The second in which the ticket had originally been issued, if any.
    pub issued_in_second: Option<i64>,
    /// The second in which the rejection was registered.
    pub limited_in_second: i64,
    /// The second in which the ticket was re-issued, once known.
    pub reissued_in_second: Option<i64>,
}

impl RateLimitEvent {
    /// Whether this event is still waiting on a reissue.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.reissued_in_second.is_none()
    }
}

/// A single admission request tracked through its lifecycle.
///
/// Tickets are cheap to clone: every field is either `Copy` or itself cheaply
/// cloneable, so buckets move tickets between their lists by value rather than
/// juggling shared references (see the "deep-copy on snapshot" design note —
/// value semantics make the question moot).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Monotonically increasing id, scoped to the owning limiter.
    pub request_id: u64,
    /// The second bucket in which this ticket first appeared.
    pub initial_request_second: i64,
    /// Opaque caller-supplied correlation id.
    pub correlation_id: Option<String>,
    /// Opaque model name, used only for bookkeeping/logging.
    pub model_name: Option<String>,
    /// The ticket number issued within its issuing second, once granted.
    pub issued_ticket: Option<u64>,
    /// The second bucket in which the ticket was issued, once granted.
    pub issued_in_second: Option<i64>,
    /// History of upstream throttle events against this ticket.
    pub rate_limit_events: Vec<RateLimitEvent>,
    /// The second bucket in which the request finished, once it has.
    pub finished_in_second: Option<i64>,
}

impl Ticket {
    /// Create a fresh, unissued ticket recorded against `initial_request_second`.
    pub(crate) fn new(
        request_id: u64,
        initial_request_second: i64,
        correlation_id: Option<String>,
        model_name: Option<String>,
    ) -> Self {
        Self {
            request_id,
            initial_request_second,
            correlation_id,
            model_name,
            issued_ticket: None,
            issued_in_second: None,
            rate_limit_events: Vec::new(),
            finished_in_second: None,
        }
    }

    /// Whether this ticket currently holds an issued slot.
    #[must_use]
    pub const fn has_issued_ticket(&self) -> bool {
        self.issued_ticket.is_some()
    }

    /// Record that `issued_ticket` was granted during `second`.
    pub(crate) fn record_issued_ticket(&mut self, issued_ticket: u64, second: i64) {
        self.issued_ticket = Some(issued_ticket);
        self.issued_in_second = Some(second);
    }

    /// Clear issuance, and append a new, unresolved [`RateLimitEvent`] for
    /// the rejection registered during `second`.
    pub(crate) fn add_rate_limit_event(&mut self, second: i64) {
        let issued_in_second = self.issued_in_second.take();
        self.issued_ticket = None;
        self.rate_limit_events.push(RateLimitEvent {
            issued_in_second,
            limited_in_second: second,
            reissued_in_second: None,
        });
    }

    /// Stamp the most recent (necessarily still-waiting) rate-limit event
    /// with the second in which the ticket was reissued.
    pub(crate) fn resolve_rate_limit(&mut self, second: i64) {
        if let Some(event) = self.rate_limit_events.last_mut() {
            event.reissued_in_second = Some(second);
        }
    }

    /// The most recent rate-limit event recorded against this ticket, if any.
    #[must_use]
    pub fn last_rate_limit_event(&self) -> Option<&RateLimitEvent> {
        self.rate_limit_events.last()
    }

    /// Record that the request finished during `second`.
    pub(crate) fn finish(&mut self, second: i64) {
        self.finished_in_second = Some(second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // Tickets cross the waiter handshake between the ticker thread and
    // whichever caller thread is parked on them.
    assert_impl_all!(Ticket: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(RateLimitEvent: Clone, Copy, Debug, PartialEq, Send, Sync);

    #[test]
    fn issuance_round_trip() {
        let mut ticket = Ticket::new(0, 10, Some("corr".into()), Some("gpt".into()));
        assert!(!ticket.has_issued_ticket());

        ticket.record_issued_ticket(1, 10);
        assert!(ticket.has_issued_ticket());
        assert_eq!(ticket.issued_in_second, Some(10));

        ticket.add_rate_limit_event(10);
        assert!(!ticket.has_issued_ticket());
        assert_eq!(ticket.rate_limit_events.len(), 1);
        assert!(ticket.rate_limit_events[0].is_waiting());

        ticket.resolve_rate_limit(12);
        assert!(!ticket.rate_limit_events[0].is_waiting());
        assert_eq!(ticket.rate_limit_events[0].reissued_in_second, Some(12));
        assert!(ticket.rate_limit_events[0].limited_in_second <= 12);

        ticket.finish(13);
        assert_eq!(ticket.finished_in_second, Some(13));
    }
}
