use super::*;
use crate::clock::ManualClock;

fn queue_name(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

fn stats(enqueued: u64, failed: u64) -> QueueStats {
    QueueStats {
        total_enqueued: enqueued,
        total_failed: failed,
        ..QueueStats::default()
    }
}

fn snapshot(name: &QueueName, stats: QueueStats) -> HashMap<QueueName, QueueStats> {
    let mut map = HashMap::new();
    map.insert(name.clone(), stats);
    map
}

#[test]
fn test_unknown_queue_is_closed() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    assert!(!monitor.is_open(&queue_name("anything")));
}

#[test]
fn test_high_error_rate_trips_breaker() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    // 60% window error rate
    monitor.evaluate(&snapshot(&name, stats(10, 6)), &clock);

    let state = monitor.state_of(&name);
    assert!(state.is_open);
    assert_eq!(state.failure_count, 6);
    assert!(state.next_retry_time.is_some());
}

#[test]
fn test_moderate_error_rate_stays_closed() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    // Exactly at the threshold does not trip; the rate must exceed it
    monitor.evaluate(&snapshot(&name, stats(10, 5)), &clock);

    assert!(!monitor.is_open(&name));
}

#[test]
fn test_window_is_delta_not_lifetime() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    // Lifetime rate is high but the first evaluation consumes it
    monitor.evaluate(&snapshot(&name, stats(10, 6)), &clock);
    monitor.reset(&name);

    // New window: 100 more enqueued, 2 more failures -> 2%
    monitor.evaluate(&snapshot(&name, stats(110, 8)), &clock);

    assert!(!monitor.is_open(&name));
}

#[test]
fn test_open_breaker_waits_for_cooldown() {
    let config = CircuitBreakerConfig::default();
    let monitor = CircuitBreakerMonitor::new(config.clone());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    monitor.evaluate(&snapshot(&name, stats(10, 6)), &clock);
    assert!(monitor.is_open(&name));

    // Healthy window before the cooldown elapses changes nothing
    clock.advance(Duration::from_secs(10));
    monitor.evaluate(&snapshot(&name, stats(110, 6)), &clock);
    assert!(monitor.is_open(&name));
}

#[test]
fn test_breaker_closes_after_cooldown_when_healthy() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    monitor.evaluate(&snapshot(&name, stats(10, 6)), &clock);

    clock.advance(Duration::from_secs(61));
    // 5% window error rate, under the close threshold
    monitor.evaluate(&snapshot(&name, stats(110, 11)), &clock);

    let state = monitor.state_of(&name);
    assert!(!state.is_open);
    assert_eq!(state.failure_count, 0);
}

#[test]
fn test_breaker_stays_open_when_still_failing() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    monitor.evaluate(&snapshot(&name, stats(10, 6)), &clock);

    clock.advance(Duration::from_secs(61));
    // 30% window rate: under trip but over close, so it stays open
    monitor.evaluate(&snapshot(&name, stats(20, 9)), &clock);

    let state = monitor.state_of(&name);
    assert!(state.is_open);
    // Cooldown was extended
    let next_retry = state.next_retry_time.unwrap();
    assert!(next_retry > clock.now());
}

#[test]
fn test_reset_forces_closed() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("orders");

    monitor.evaluate(&snapshot(&name, stats(10, 6)), &clock);
    assert!(monitor.is_open(&name));

    monitor.reset(&name);
    assert!(!monitor.is_open(&name));
}

#[test]
fn test_all_states_tracks_every_evaluated_queue() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();

    let mut map = HashMap::new();
    map.insert(queue_name("healthy"), stats(100, 1));
    map.insert(queue_name("failing"), stats(10, 8));
    monitor.evaluate(&map, &clock);

    let states = monitor.all_states();
    assert_eq!(states.len(), 2);
    assert!(!states[&queue_name("healthy")].is_open);
    assert!(states[&queue_name("failing")].is_open);
}

#[test]
fn test_empty_window_has_zero_rate() {
    let monitor = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let clock = ManualClock::starting_now();
    let name = queue_name("idle");

    monitor.evaluate(&snapshot(&name, stats(0, 0)), &clock);
    monitor.evaluate(&snapshot(&name, stats(0, 0)), &clock);

    assert!(!monitor.is_open(&name));
}
