use super::*;
use crate::clock::ManualClock;
use crate::{AgentId, MessagePriority};
use serde_json::json;

fn queue_name(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

fn message() -> Message {
    Message::new(
        AgentId::new("sender").unwrap(),
        AgentId::new("recipient").unwrap(),
        "task_request",
    )
}

fn clock() -> ManualClock {
    ManualClock::starting_now()
}

mod config_tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        let config = QueueConfig::fifo(queue_name("q1"), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_age_rejected() {
        let config = QueueConfig::fifo(queue_name("q1"), 10).with_max_age(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_retries_defaults_without_dead_letter() {
        let config = QueueConfig::fifo(queue_name("q1"), 10);
        assert_eq!(config.max_retries(), DEFAULT_MAX_RETRIES);

        let config = config
            .with_dead_letter(DeadLetterConfig::new(queue_name("dlq")).with_max_retries(7));
        assert_eq!(config.max_retries(), 7);
    }
}

mod discipline_tests {
    use super::*;

    #[test]
    fn test_fifo_preserves_insertion_order() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));

        let messages: Vec<Message> = (0..3).map(|_| message()).collect();
        for msg in &messages {
            queue.push(QueueEntry::new(msg.clone(), clock.now()));
        }

        let order: Vec<_> = queue.entries().map(|e| e.message.message_id).collect();
        let expected: Vec<_> = messages.iter().map(|m| m.message_id).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_priority_orders_by_rank() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::priority(queue_name("q1"), 10));

        let low = message().with_priority(MessagePriority::Low);
        let critical = message().with_priority(MessagePriority::Critical);
        let normal = message();
        queue.push(QueueEntry::new(low.clone(), clock.now()));
        queue.push(QueueEntry::new(critical.clone(), clock.now()));
        queue.push(QueueEntry::new(normal.clone(), clock.now()));

        let order: Vec<_> = queue.entries().map(|e| e.message.message_id).collect();
        assert_eq!(
            order,
            vec![critical.message_id, normal.message_id, low.message_id]
        );
    }

    #[test]
    fn test_priority_insert_is_stable_for_equal_rank() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::priority(queue_name("q1"), 10));

        let first = message();
        let second = message();
        queue.push(QueueEntry::new(first.clone(), clock.now()));
        queue.push(QueueEntry::new(second.clone(), clock.now()));

        let order: Vec<_> = queue.entries().map(|e| e.message.message_id).collect();
        assert_eq!(order, vec![first.message_id, second.message_id]);
    }
}

mod batch_tests {
    use super::*;

    #[test]
    fn test_take_batch_marks_processing_and_limits() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));
        for _ in 0..5 {
            queue.push(QueueEntry::new(message(), clock.now()));
        }

        let batch = queue.take_batch(3, clock.now());

        assert_eq!(batch.len(), 3);
        for entry in &batch {
            assert_eq!(entry.status, EntryStatus::Processing);
            assert_eq!(entry.attempts, 1);
        }
        // In-flight entries are not picked up again
        assert_eq!(queue.take_batch(10, clock.now()).len(), 2);
    }

    #[test]
    fn test_backoff_gate_excludes_entries() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));
        queue.push(QueueEntry::new(message(), clock.now()));

        let batch = queue.take_batch(10, clock.now());
        let id = batch[0].message.message_id;
        queue.fail(&id, &RetryPolicy::default(), clock.now());

        assert!(queue.take_batch(10, clock.now()).is_empty());

        clock.advance(Duration::from_secs(2));
        assert_eq!(queue.take_batch(10, clock.now()).len(), 1);
    }
}

mod completion_tests {
    use super::*;

    #[test]
    fn test_complete_removes_and_counts_wait() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));
        queue.push(QueueEntry::new(message(), clock.now()));

        let batch = queue.take_batch(1, clock.now());
        clock.advance(Duration::from_millis(250));
        let entry = queue.complete(&batch[0].message.message_id, clock.now());

        assert!(entry.is_some());
        assert!(queue.is_empty());

        let stats = queue.stats();
        assert_eq!(stats.total_dequeued, 1);
        assert_eq!(stats.total_wait_ms, 250);
        assert_eq!(stats.average_wait(), Duration::from_millis(250));
    }

    #[test]
    fn test_complete_missing_entry_is_noop() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));

        assert!(queue.complete(&crate::MessageId::new(), clock.now()).is_none());
        assert_eq!(queue.stats().total_dequeued, 0);
    }
}

mod failure_tests {
    use super::*;

    #[test]
    fn test_fail_below_cap_requeues() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));
        queue.push(QueueEntry::new(message(), clock.now()));
        let id = queue.take_batch(1, clock.now())[0].message.message_id;

        let outcome = queue.fail(&id, &RetryPolicy::default(), clock.now());

        assert!(matches!(outcome, FailOutcome::Retrying { .. }));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().total_failed, 1);
    }

    #[test]
    fn test_fail_at_cap_exhausts() {
        let clock = clock();
        let config = QueueConfig::fifo(queue_name("q1"), 10)
            .with_dead_letter(DeadLetterConfig::new(queue_name("dlq")).with_max_retries(2));
        let mut queue = Queue::new(config);
        queue.push(QueueEntry::new(message(), clock.now()));

        let id = queue.take_batch(1, clock.now())[0].message.message_id;
        queue.fail(&id, &RetryPolicy::default(), clock.now());

        clock.advance(Duration::from_secs(5));
        let id = queue.take_batch(1, clock.now())[0].message.message_id;
        let outcome = queue.fail(&id, &RetryPolicy::default(), clock.now());

        match outcome {
            FailOutcome::Exhausted(entry) => {
                assert_eq!(entry.attempts, 2);
                assert_eq!(entry.status, EntryStatus::Failed);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fail_missing_entry_is_noop() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));

        let outcome = queue.fail(
            &crate::MessageId::new(),
            &RetryPolicy::default(),
            clock.now(),
        );
        assert!(matches!(outcome, FailOutcome::AlreadyRemoved));
    }
}

mod expiry_tests {
    use super::*;

    #[test]
    fn test_sweep_removes_only_aged_entries() {
        let clock = clock();
        let config = QueueConfig::fifo(queue_name("q1"), 10).with_max_age(Duration::from_secs(60));
        let mut queue = Queue::new(config);

        queue.push(QueueEntry::new(message(), clock.now()));
        clock.advance(Duration::from_secs(45));
        queue.push(QueueEntry::new(message(), clock.now()));

        clock.advance(Duration::from_secs(30));
        let expired = queue.sweep_expired(clock.now());

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, EntryStatus::Expired);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().total_expired, 1);
    }

    #[test]
    fn test_sweep_removes_in_flight_entries_too() {
        let clock = clock();
        let config = QueueConfig::fifo(queue_name("q1"), 10).with_max_age(Duration::from_secs(60));
        let mut queue = Queue::new(config);
        queue.push(QueueEntry::new(message(), clock.now()));

        let id = queue.take_batch(1, clock.now())[0].message.message_id;
        clock.advance(Duration::from_secs(61));
        let expired = queue.sweep_expired(clock.now());

        assert_eq!(expired.len(), 1);
        // The in-flight attempt then resolves as a no-op
        assert!(queue.complete(&id, clock.now()).is_none());
    }

    #[test]
    fn test_sweep_without_max_age_is_noop() {
        let clock = clock();
        let mut queue = Queue::new(QueueConfig::fifo(queue_name("q1"), 10));
        queue.push(QueueEntry::new(message(), clock.now()));

        clock.advance(Duration::from_secs(3600));
        assert!(queue.sweep_expired(clock.now()).is_empty());
        assert_eq!(queue.len(), 1);
    }
}

mod queue_set_tests {
    use super::*;

    #[test]
    fn test_duplicate_queue_rejected() {
        let set = QueueSet::new();
        set.create(QueueConfig::fifo(queue_name("q1"), 10)).unwrap();

        assert!(matches!(
            set.create(QueueConfig::fifo(queue_name("q1"), 20)),
            Err(RouterError::DuplicateQueue { .. })
        ));
    }

    #[test]
    fn test_self_dead_letter_rejected() {
        let set = QueueSet::new();
        let config = QueueConfig::fifo(queue_name("q1"), 10)
            .with_dead_letter(DeadLetterConfig::new(queue_name("q1")));

        assert!(matches!(
            set.create(config),
            Err(RouterError::DeadLetterCycle { .. })
        ));
    }

    #[test]
    fn test_enqueue_to_missing_queue_fails() {
        let set = QueueSet::new();
        let clock = clock();

        assert!(matches!(
            set.enqueue(&queue_name("missing"), message(), &clock),
            Err(RouterError::QueueNotFound { .. })
        ));
    }

    #[test]
    fn test_overflow_moves_to_dead_letter_with_reason() {
        let set = QueueSet::new();
        let clock = clock();
        let q1 = queue_name("q1");
        let dlq = queue_name("dlq1");
        set.create(
            QueueConfig::fifo(q1.clone(), 2).with_dead_letter(DeadLetterConfig::new(dlq.clone())),
        )
        .unwrap();

        assert_eq!(
            set.enqueue(&q1, message(), &clock).unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            set.enqueue(&q1, message(), &clock).unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            set.enqueue(&q1, message(), &clock).unwrap(),
            EnqueueOutcome::DeadLettered {
                queue_name: dlq.clone()
            }
        );

        // The dead-letter queue was created lazily
        let dead = set.get(&dlq).unwrap();
        let dead = dead.lock().unwrap();
        assert_eq!(dead.len(), 1);
        let entry = dead.entries().next().unwrap();
        assert_eq!(
            entry.message.metadata.get(DEAD_LETTER_REASON_KEY),
            Some(&json!("queue_full"))
        );
        assert_eq!(
            entry.message.metadata.get(DEAD_LETTER_ORIGIN_KEY),
            Some(&json!("q1"))
        );
    }

    #[test]
    fn test_overflow_without_dead_letter_is_error() {
        let set = QueueSet::new();
        let clock = clock();
        let q1 = queue_name("q1");
        set.create(QueueConfig::fifo(q1.clone(), 1)).unwrap();

        set.enqueue(&q1, message(), &clock).unwrap();
        let result = set.enqueue(&q1, message(), &clock);

        assert!(matches!(
            result,
            Err(RouterError::CapacityExceeded { capacity: 1, .. })
        ));
        assert!(result.unwrap_err().is_retryable());
    }

    #[test]
    fn test_full_dead_letter_queue_is_error() {
        let set = QueueSet::new();
        let clock = clock();
        let q1 = queue_name("q1");
        let dlq = queue_name("dlq1");
        set.create(QueueConfig::fifo(dlq.clone(), 1)).unwrap();
        set.create(
            QueueConfig::fifo(q1.clone(), 1).with_dead_letter(DeadLetterConfig::new(dlq.clone())),
        )
        .unwrap();

        set.enqueue(&q1, message(), &clock).unwrap();
        set.enqueue(&q1, message(), &clock).unwrap();
        let result = set.enqueue(&q1, message(), &clock);

        assert!(matches!(
            result,
            Err(RouterError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_stats_snapshot_covers_all_queues() {
        let set = QueueSet::new();
        let clock = clock();
        set.create(QueueConfig::fifo(queue_name("a"), 10)).unwrap();
        set.create(QueueConfig::fifo(queue_name("b"), 10)).unwrap();
        set.enqueue(&queue_name("a"), message(), &clock).unwrap();

        let snapshot = set.stats_snapshot();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&queue_name("a")].total_enqueued, 1);
        assert_eq!(snapshot[&queue_name("b")].total_enqueued, 0);
    }
}
