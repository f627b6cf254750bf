//! SPMC ring tests: broadcast semantics, capacity backpressure,
//! batching and blocking waits.

use matchbook_rs::MarketRing;
use std::time::Duration;

#[test]
fn test_every_consumer_sees_every_item_in_order() {
    let (mut producer, consumers) = MarketRing::<u64>::with_consumers(4, 3, 0);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for mut consumer in consumers {
            handles.push(scope.spawn(move || {
                let mut seen = Vec::new();
                while seen.len() < 10 {
                    if let Some(value) = consumer.dequeue() {
                        seen.push(value);
                    } else {
                        std::hint::spin_loop();
                    }
                }
                seen
            }));
        }

        // Capacity 4, ten items: the producer must block on the gate
        // until the slowest consumer advances.
        for i in 0..10u64 {
            producer.enqueue(i);
        }

        for handle in handles {
            let seen = handle.join().expect("consumer thread");
            assert_eq!(seen, (0..10).collect::<Vec<u64>>());
        }
    });
}

#[test]
fn test_try_enqueue_full_then_drain() {
    let (mut producer, mut consumers) = MarketRing::<u64>::with_consumers(4, 1, 0);
    let consumer = &mut consumers[0];

    for i in 0..4 {
        assert!(producer.try_enqueue(i), "capacity-1 enqueues succeed");
    }
    // At capacity: the producer cannot place another item.
    assert!(!producer.try_enqueue(99));

    assert_eq!(consumer.dequeue(), Some(0));
    assert!(producer.try_enqueue(4));
    for expected in 1..=4 {
        assert_eq!(consumer.dequeue(), Some(expected));
    }
    assert_eq!(consumer.dequeue(), None);
}

#[test]
fn test_slowest_consumer_gates_producer() {
    let (mut producer, mut consumers) = MarketRing::<u64>::with_consumers(2, 2, 0);

    producer.enqueue(1);
    producer.enqueue(2);
    // Consumer 0 drains; consumer 1 has not moved.
    assert_eq!(consumers[0].dequeue(), Some(1));
    assert_eq!(consumers[0].dequeue(), Some(2));
    assert!(!producer.try_enqueue(3), "slow consumer still owns slots");

    assert_eq!(consumers[1].dequeue(), Some(1));
    assert!(producer.try_enqueue(3));
    assert_eq!(consumers[1].dequeue(), Some(2));
    assert_eq!(consumers[1].dequeue(), Some(3));
    assert_eq!(consumers[0].dequeue(), Some(3));
}

#[test]
fn test_dequeue_batch_single_cursor_store() {
    let (mut producer, mut consumers) = MarketRing::<u64>::with_consumers(8, 1, 0);
    for i in 0..6 {
        producer.enqueue(i);
    }

    let consumer = &mut consumers[0];
    let mut out = [0u64; 4];
    assert_eq!(consumer.dequeue_batch(&mut out), 4);
    assert_eq!(out, [0, 1, 2, 3]);
    assert_eq!(consumer.len(), 2);

    let mut out = [0u64; 4];
    assert_eq!(consumer.dequeue_batch(&mut out), 2);
    assert_eq!(&out[..2], &[4, 5]);
    assert_eq!(consumer.dequeue_batch(&mut out), 0);
    assert!(consumer.is_empty());
}

#[test]
fn test_wait_wakes_on_notify_batch() {
    let (mut producer, mut consumers) = MarketRing::<u64>::with_consumers(16, 1, 4);
    let mut consumer = consumers.pop().expect("consumer");

    std::thread::scope(|scope| {
        let handle = scope.spawn(move || {
            consumer.wait(4);
            let mut out = [0u64; 8];
            consumer.dequeue_batch(&mut out)
        });

        // Four items hit the notify batch and wake the waiter.
        for i in 0..4 {
            producer.enqueue(i);
        }

        assert_eq!(handle.join().expect("waiter"), 4);
    });
}

#[test]
fn test_wait_timeout_expires_when_quiet() {
    let (_producer, consumers) = MarketRing::<u64>::with_consumers(4, 1, 0);
    assert!(!consumers[0].wait_timeout(1, Duration::from_millis(20)));
}

#[test]
fn test_wait_timeout_met_when_data_arrives() {
    let (mut producer, mut consumers) = MarketRing::<u64>::with_consumers(4, 1, 1);
    let consumer = consumers.pop().expect("consumer");

    std::thread::scope(|scope| {
        let handle = scope.spawn(move || consumer.wait_timeout(1, Duration::from_secs(5)));
        producer.enqueue(7);
        assert!(handle.join().expect("waiter"));
    });
}

#[test]
fn test_capacity_rounds_to_power_of_two() {
    let (producer, _consumers) = MarketRing::<u64>::with_consumers(5, 1, 0);
    drop(producer);
}

#[test]
fn test_pointer_payloads() {
    // The ring carries arbitrary pointer-sized payloads.
    let values = [10u64, 20, 30];
    let (mut producer, mut consumers) = MarketRing::<usize>::with_consumers(4, 1, 0);
    for v in &values {
        producer.enqueue(std::ptr::from_ref(v) as usize);
    }
    let consumer = &mut consumers[0];
    for v in &values {
        let addr = consumer.dequeue().expect("pointer");
        assert_eq!(addr, std::ptr::from_ref(v) as usize);
        // SAFETY: values outlives the ring round-trip.
        assert_eq!(unsafe { *(addr as *const u64) }, *v);
    }
}
