//! Caller-side retry contract (§4.7).
//!
//! The core never retries anything itself; it only issues and revives
//! tickets. This module is the higher-order adapter a caller wraps around an
//! actual remote call, translating the original's `llmiter` decorator into a
//! plain function the way the sibling ratelimiter composes
//! `InMemoryRatelimiter` around `reqwest` calls rather than hiding it behind
//! macros.

use crate::limiter::{Limiter, RATE_LIMIT_RETRIES};
use crate::ticket::Ticket;

/// Tells [`with_admission_control`] how to interpret one failed attempt.
///
/// Implemented for whatever error type the caller's remote operation
/// returns; `http::StatusCode` callers will typically check for 429/529.
pub trait UpstreamOutcome {
    /// Whether this failure represents an upstream throttle (429/529) that
    /// should be retried against a revived ticket, as opposed to some other
    /// failure that should simply propagate.
    fn is_rate_limited(&self) -> bool;
}

/// Blanket impl for any error classified purely by a predicate, so callers
/// that don't want to implement [`UpstreamOutcome`] on their own error type
/// can use [`with_admission_control_by`] instead.
impl<E> UpstreamOutcome for &E
where
    E: UpstreamOutcome,
{
    fn is_rate_limited(&self) -> bool {
        (*self).is_rate_limited()
    }
}

/// Run `operation` under `limiter`'s admission control, retrying up to
/// [`RATE_LIMIT_RETRIES`] times on upstream throttles (§4.7).
///
/// `operation` receives the currently issued [`Ticket`] (useful for
/// correlating logs) and returns `Ok` on success or an error classified via
/// [`UpstreamOutcome`]. Non-throttle failures are returned immediately after
/// the ticket is handed back to the limiter as a normal completion; the core
/// treats "upstream rejected for a reason other than rate limiting" the same
/// as "succeeded", from an admission-control point of view (§7).
pub fn with_admission_control<T, E, F>(limiter: &Limiter, mut operation: F) -> Result<T, E>
where
    F: FnMut(&Ticket) -> Result<T, E>,
    E: UpstreamOutcome,
{
    with_admission_control_by(limiter, |error| error.is_rate_limited(), operation_adapter(&mut operation))
}

fn operation_adapter<T, E>(operation: &mut impl FnMut(&Ticket) -> Result<T, E>) -> impl FnMut(&Ticket) -> Result<T, E> + '_ {
    move |ticket| operation(ticket)
}

/// Like [`with_admission_control`], but classifies failures with an explicit
/// predicate instead of requiring an [`UpstreamOutcome`] impl. Useful when
/// the error type is foreign (e.g. a raw `http::StatusCode`).
///
/// Calls `operation` at most [`RATE_LIMIT_RETRIES`] times (§4.7's 20-attempt
/// budget). If the budget is exhausted while the upstream is still reporting
/// a throttle, the last rate-limit error is returned as-is rather than
/// spending a 21st call on one more attempt.
pub fn with_admission_control_by<T, E, F, IsRateLimited>(
    limiter: &Limiter,
    is_rate_limited: IsRateLimited,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(&Ticket) -> Result<T, E>,
    IsRateLimited: Fn(&E) -> bool,
{
    let mut ticket = limiter.acquire(None, None);

    for attempt in 0..RATE_LIMIT_RETRIES {
        let error = match operation(&ticket) {
            Ok(value) => {
                limiter.return_ticket(ticket);
                return Ok(value);
            }
            Err(error) => error,
        };

        if !is_rate_limited(&error) {
            limiter.return_ticket(ticket);
            return Err(error);
        }

        if attempt + 1 == RATE_LIMIT_RETRIES {
            limiter.return_ticket(ticket);
            return Err(error);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, "upstream rate limited, retrying with revived ticket");
        ticket = limiter.rate_limit_exceeded(ticket);
    }

    unreachable!("every branch of the loop above returns before the range is exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum FakeUpstreamError {
        RateLimited,
        Other,
    }

    impl UpstreamOutcome for FakeUpstreamError {
        fn is_rate_limited(&self) -> bool {
            matches!(self, FakeUpstreamError::RateLimited)
        }
    }

    #[test]
    fn succeeds_on_first_attempt_without_retry() {
        let limiter = Limiter::new("svc", 600, || false);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, FakeUpstreamError> =
            with_admission_control(&limiter, move |_ticket| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_rate_limit_failure_propagates_without_retry() {
        let limiter = Limiter::new("svc", 600, || false);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, FakeUpstreamError> =
            with_admission_control(&limiter, move |_ticket| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Err(FakeUpstreamError::Other)
            });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // The retry-on-rate-limit path blocks the calling thread on a Waiter
    // until a probe clears the pause and a tick drains the rate-limited
    // list; exercising it needs a real driving thread and real probe
    // back-off delays, so that scenario lives in the integration suite
    // (tests/wrapper.rs) alongside the rest of §8's scenarios rather than
    // as an inline unit test here.
}
