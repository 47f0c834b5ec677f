//! Tests for the injectable clock.

use super::*;

/// Verify the manual clock only moves when advanced.
#[test]
fn test_manual_clock_is_stable_until_advanced() {
    let clock = ManualClock::starting_now();
    let first = clock.now();
    let second = clock.now();
    assert_eq!(first, second);
}

/// Verify advancing moves the clock by exactly the given duration.
#[test]
fn test_manual_clock_advance() {
    let clock = ManualClock::starting_now();
    let start = clock.now();

    clock.advance(Duration::from_secs(90));

    let elapsed = clock.now().duration_since(start);
    assert_eq!(elapsed, Duration::from_secs(90));
}

/// Verify the system clock is monotonically non-decreasing across reads.
#[test]
fn test_system_clock_does_not_go_backwards() {
    let clock = SystemClock;
    let first = clock.now();
    let second = clock.now();
    assert!(second >= first);
}

/// Verify consumers can be driven by a mocked clock.
#[test]
fn test_mock_clock_returns_programmed_instant() {
    let instant = Timestamp::now();

    let mut clock = MockClock::new();
    clock.expect_now().times(2).return_const(instant);

    assert_eq!(clock.now(), instant);
    assert_eq!(clock.now(), instant);
}
