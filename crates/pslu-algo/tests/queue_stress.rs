use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use pslu_algo::queue::TaskQueue;

#[test]
fn test_every_item_dequeued_exactly_once() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 8;
    const PER_PRODUCER: usize = 2_500;

    let queue = Arc::new(TaskQueue::new());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.enqueue(p * PER_PRODUCER + i);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(queue.len(), PRODUCERS * PER_PRODUCER);

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut taken = Vec::new();
                while let Some(item) = queue.dequeue() {
                    taken.push(item);
                }
                taken
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for consumer in consumers {
        for item in consumer.join().unwrap() {
            assert!(seen.insert(item), "item {item} dequeued twice");
        }
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    assert!(queue.is_empty());
}

#[test]
fn test_concurrent_enqueue_and_dequeue() {
    let queue = Arc::new(TaskQueue::new());
    let total = 10_000;
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut taken = Vec::new();
                for i in (t..total).step_by(8) {
                    queue.enqueue(i);
                    if let Some(item) = queue.dequeue() {
                        taken.push(item);
                    }
                }
                taken
            })
        })
        .collect();

    let mut seen: HashSet<usize> = HashSet::new();
    for handle in handles {
        seen.extend(handle.join().unwrap());
    }
    while let Some(item) = queue.dequeue() {
        assert!(seen.insert(item));
    }
    assert_eq!(seen.len(), total);
}
