//! One-second ticket inventory.
//!
//! A [`SecondBucket`] is the unit of quota accounting: it knows how many
//! tickets it may issue this second, tracks who holds them, and absorbs
//! whatever it can't satisfy into an overflow list for the next second to
//! pick up.

use crate::ticket::Ticket;
use serde::{Deserialize, Serialize};

/// A single one-second slot of ticket inventory and its event lists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecondBucket {
    /// Absolute epoch-seconds id of this bucket.
    pub second_id: i64,
    /// Number of fresh `acquire` calls seen this second.
    pub second_requested_count: u64,
    /// Inventory available to issue this second.
    pub ticket_count: u64,
    /// Number of tickets actually issued this second.
    pub issued_count: u64,
    /// Tickets issued this second, in issuance order.
    pub issued: Vec<Ticket>,
    /// Tickets that arrived but found no inventory.
    pub overflow: Vec<Ticket>,
    /// Tickets that had been issued but were rejected upstream this second.
    pub rate_limited: Vec<Ticket>,
    /// Tickets that completed this second, regardless of when issued.
    pub finished: Vec<Ticket>,
}

impl SecondBucket {
    /// A fresh, empty bucket for the given absolute second.
    #[must_use]
    pub fn new(second_id: i64) -> Self {
        Self {
            second_id,
            second_requested_count: 0,
            ticket_count: 0,
            issued_count: 0,
            issued: Vec::new(),
            overflow: Vec::new(),
            rate_limited: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// Whether this bucket saw any activity at all: a good signal for
    /// trimming trailing idle seconds out of a replayed log (§10.4).
    #[must_use]
    pub fn had_activity(&self) -> bool {
        self.second_requested_count > 0
            || self.issued_count > 0
            || !self.finished.is_empty()
            || !self.overflow.is_empty()
            || !self.rate_limited.is_empty()
    }

    /// Record a fresh arrival and attempt immediate issuance.
    ///
    /// Always returns the new [`Ticket`]; callers check
    /// [`Ticket::has_issued_ticket`] to know whether it must wait.
    pub(crate) fn acquire(
        &mut self,
        request_id: u64,
        correlation_id: Option<String>,
        model_name: Option<String>,
    ) -> Ticket {
        self.second_requested_count += 1;
        let mut ticket = Ticket::new(request_id, self.second_id, correlation_id, model_name);
        if !self.issue(&mut ticket) {
            self.overflow.push(ticket.clone());
        }
        ticket
    }

    /// Attempt to issue `ticket` against this bucket's remaining inventory.
    ///
    /// Returns whether issuance succeeded. On success the ticket is recorded
    /// as issued and appended to [`Self::issued`].
    fn issue(&mut self, ticket: &mut Ticket) -> bool {
        if self.issued_count < self.ticket_count {
            self.issued_count += 1;
            ticket.record_issued_ticket(self.issued_count, self.second_id);
            self.issued.push(ticket.clone());
            true
        } else {
            false
        }
    }

    /// Mark `ticket` finished during this second.
    pub(crate) fn finish(&mut self, mut ticket: Ticket) {
        ticket.finish(self.second_id);
        self.finished.push(ticket);
    }

    /// Record an upstream throttle against `ticket`: stop further issuance
    /// this second and move the ticket to the rate-limited list.
    ///
    /// See design note on the open question of conflating "finished for
    /// throughput metrics" with "stop issuing" — preserved as specified.
    pub(crate) fn add_rate_limit(&mut self, mut ticket: Ticket) {
        self.ticket_count = 0;
        ticket.add_rate_limit_event(self.second_id);
        self.rate_limited.push(ticket);
    }

    /// Compute this bucket's inventory from the ramp parameters and the
    /// previous second's issuance.
    ///
    /// If the previous second issued exactly `max_ticket_count`, the ramp is
    /// considered complete and this bucket starts at `max_ticket_count`
    /// immediately — a deliberate special case (see design note), not a
    /// simplification to monotone growth.
    pub(crate) fn set_ticket_count(
        &mut self,
        max_ticket_count: u64,
        min_ticket_count: u64,
        prior_issued_count: u64,
        ticket_count_delta: u64,
    ) {
        let next = if prior_issued_count == max_ticket_count {
            max_ticket_count
        } else {
            prior_issued_count + ticket_count_delta
        };
        self.ticket_count = next.min(max_ticket_count).max(min_ticket_count);
    }

    /// Admit carry-over from the previous second: rate-limited candidates are
    /// considered before overflow candidates (they represent already-promised
    /// work), and within each class, in arrival (FIFO) order.
    ///
    /// Returns the tickets successfully promoted into this bucket, so their
    /// waiters can be signalled.
    pub(crate) fn transfer_from(
        &mut self,
        overflow_from_prev: Vec<Ticket>,
        rate_limited_from_prev: Vec<Ticket>,
    ) -> Vec<Ticket> {
        let mut released = Vec::new();

        for mut ticket in rate_limited_from_prev {
            if self.issue(&mut ticket) {
                ticket.resolve_rate_limit(self.second_id);
                released.push(ticket);
            } else {
                self.rate_limited.push(ticket);
            }
        }

        for mut ticket in overflow_from_prev {
            if self.issue(&mut ticket) {
                released.push(ticket);
            } else {
                self.overflow.push(ticket);
            }
        }

        released
    }
}
