//! Exercises the adaptive pause/resume cycle (§4.5, scenario S3) through the
//! real probe timer. The probe's minimum interval is a real 10 seconds, so
//! this test is inherently slower than the rest of the suite — that delay
//! is the thing under test, not incidental overhead.

use ratellmiter::Monitor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn rate_limit_exceeded_pauses_and_real_probe_resumes() {
    let monitor = Monitor::global();

    let blocked = Arc::new(AtomicBool::new(true));
    let blocked_clone = Arc::clone(&blocked);
    let limiter = monitor.limiter("probe-svc", 600, move || blocked_clone.load(Ordering::SeqCst));
    monitor.start();

    let ticket = limiter.acquire(None, None);
    assert!(ticket.has_issued_ticket());
    assert!(!limiter.is_paused());

    let limiter_clone = limiter.clone();
    let joiner = thread::spawn(move || limiter_clone.rate_limit_exceeded(ticket));

    thread::sleep(Duration::from_millis(100));
    assert!(limiter.is_paused(), "limiter should pause immediately on throttle");

    // Unblock well before the probe's 10s interval elapses so the first
    // probe tick is the one that clears the pause.
    thread::sleep(Duration::from_secs(5));
    blocked.store(false, Ordering::SeqCst);

    thread::sleep(Duration::from_secs(6));
    assert!(!limiter.is_paused(), "probe should have cleared the pause by now");

    let reissued = joiner.join().expect("rate_limit_exceeded caller should have been revived");
    assert!(reissued.has_issued_ticket());
    let event = reissued.last_rate_limit_event().expect("a rate limit event should be recorded");
    assert!(event.reissued_in_second.is_some());
    assert!(event.reissued_in_second.unwrap() > event.limited_in_second);

    monitor.stop();
}
