//! Exercises `with_admission_control` (§4.7) against a real limiter driven
//! by the real monitor, including one full throttle/probe/resume cycle.

use ratellmiter::{with_admission_control, Monitor, UpstreamOutcome};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
enum UpstreamError {
    Throttled,
}

impl UpstreamOutcome for UpstreamError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::Throttled)
    }
}

#[test]
fn retries_through_one_real_throttle_cycle() {
    let monitor = Monitor::global();

    let blocked = Arc::new(AtomicBool::new(true));
    let blocked_clone = Arc::clone(&blocked);
    let limiter = monitor.limiter("wrapper-svc", 600, move || blocked_clone.load(Ordering::SeqCst));
    monitor.start();

    // unblock shortly after the first throttle so the probe's first firing
    // (10s after rate_limit_exceeded is called) clears it.
    let unblock_handle = {
        let blocked = Arc::clone(&blocked);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(2));
            blocked.store(false, Ordering::SeqCst);
        })
    };

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let result: Result<&'static str, UpstreamError> = with_admission_control(&limiter, move |_ticket| {
        if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(UpstreamError::Throttled)
        } else {
            Ok("ok")
        }
    });

    unblock_handle.join().unwrap();
    assert_eq!(result.unwrap(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    monitor.stop();
}
