//! Wall-clock scenarios driven through the real [`Monitor`] singleton,
//! exercising §8's steady-state ramp, burst/drain, and log round-trip
//! scenarios end to end. Real `std::thread`s and real sleeps throughout —
//! the scheduler's tick is wall-clock by design, not virtual time.
//!
//! `Monitor::global()` is process-wide, so the tests in this file share one
//! instance; `TEST_LOCK` keeps them from ticking concurrently against each
//! other.

use ratellmiter::{Monitor, SecondBucket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

static TEST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn steady_state_ramp_saturates_and_climbs() {
    let _guard = TEST_LOCK.lock().unwrap();
    let monitor = Monitor::global();
    monitor.reset_for_tests();

    let log_dir = tempfile::tempdir().unwrap();
    monitor.config(Some(log_dir.path().to_path_buf()), None);

    let captured = Arc::new(Mutex::new(Vec::<SecondBucket>::new()));
    let captured_clone = Arc::clone(&captured);
    monitor.add_listener(Arc::new(move |second: &SecondBucket| {
        captured_clone.lock().unwrap().push(second.clone());
    }));

    let limiter = monitor.limiter("ramp-svc", 600, || false);
    monitor.start();

    let keep_going = Arc::new(AtomicBool::new(true));
    let callers: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            let keep_going = Arc::clone(&keep_going);
            thread::spawn(move || {
                while keep_going.load(Ordering::SeqCst) {
                    let ticket = limiter.acquire(None, None);
                    limiter.return_ticket(ticket);
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(6_500));
    keep_going.store(false, Ordering::SeqCst);
    for caller in callers {
        let _ = caller.join();
    }
    monitor.stop();

    let captured = captured.lock().unwrap();
    assert!(captured.len() >= 5, "expected at least 5 ticks, saw {}", captured.len());
    assert_eq!(captured[0].ticket_count, 3);

    let mut previous = captured[0].ticket_count;
    for second in captured.iter().take(5) {
        assert_eq!(
            second.issued_count, second.ticket_count,
            "20 contending callers should saturate every second's inventory"
        );
        if previous < 10 {
            assert!(second.ticket_count >= previous);
        }
        previous = second.ticket_count;
    }
}

#[test]
fn burst_then_drain_matches_overflow_ordering() {
    let _guard = TEST_LOCK.lock().unwrap();
    let monitor = Monitor::global();
    monitor.reset_for_tests();

    let log_dir = tempfile::tempdir().unwrap();
    monitor.config(Some(log_dir.path().to_path_buf()), None);

    let captured = Arc::new(Mutex::new(Vec::<SecondBucket>::new()));
    let captured_clone = Arc::clone(&captured);
    monitor.add_listener(Arc::new(move |second: &SecondBucket| {
        captured_clone.lock().unwrap().push(second.clone());
    }));

    let limiter = monitor.limiter("burst-svc", 60, || false);
    monitor.start();

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let ticket = limiter.acquire(None, None);
                limiter.return_ticket(ticket);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5_500));
    for caller in callers {
        caller.join().expect("every burst caller should finish by second 4");
    }
    monitor.stop();

    let captured = captured.lock().unwrap();
    assert!(captured.len() >= 4, "expected at least 4 ticks, saw {}", captured.len());
    assert_eq!(captured[0].issued.len(), 1);
    assert_eq!(captured[0].overflow.len(), 4);
    for second in captured.iter().take(4).skip(1) {
        assert_eq!(second.issued.len(), 1, "one overflowed ticket should drain per second");
    }
}

#[test]
fn log_round_trip_reconstructs_burst_scenario() {
    let _guard = TEST_LOCK.lock().unwrap();
    let monitor = Monitor::global();
    monitor.reset_for_tests();
    let log_dir = tempfile::tempdir().unwrap();
    monitor.config(Some(log_dir.path().to_path_buf()), None);

    let limiter = monitor.limiter("log-svc", 60, || false);
    monitor.start();

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let ticket = limiter.acquire(None, None);
                limiter.return_ticket(ticket);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5_500));
    for caller in callers {
        caller.join().expect("every burst caller should finish by second 4");
    }
    monitor.stop();

    let minutes = ratellmiter::replay_latest(log_dir.path()).expect("log should contain the flushed minute");
    let log_svc_minute = minutes
        .iter()
        .find(|minute| minute.limiter_name == "log-svc")
        .expect("log-svc minute should have been flushed on stop");

    assert_eq!(log_svc_minute.seconds[0].issued.len(), 1);
    assert_eq!(log_svc_minute.seconds[0].overflow.len(), 4);
    assert_eq!(log_svc_minute.requested_count, 5);
    assert_eq!(log_svc_minute.finished_count, 5);
}
