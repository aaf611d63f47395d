//! Integration tests for the bounded dispatch queue.

use informant_rs::model::{BuildEvent, BuildId};
use informant_rs::queue::{BoundedDispatchQueue, PutOutcome};
use std::sync::Arc;
use std::time::Duration;

fn build(id: &str) -> BuildEvent {
    BuildEvent::new(id, "linux64", "opt")
}

fn ids(queue: &BoundedDispatchQueue) -> Vec<String> {
    queue.pending_ids().into_iter().map(|id| id.0).collect()
}

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

#[test]
fn overflow_evicts_oldest_and_reports_it_once() {
    let queue = BoundedDispatchQueue::new(2);

    assert!(matches!(queue.try_put(build("1")), PutOutcome::Admitted));
    assert!(matches!(queue.try_put(build("2")), PutOutcome::Admitted));

    match queue.try_put(build("3")) {
        PutOutcome::Displaced(old) => assert_eq!(old.build_id, BuildId::from("1")),
        other => panic!("expected Displaced, got {other:?}"),
    }

    assert_eq!(ids(&queue), vec!["2", "3"]);
}

#[test]
fn queue_never_exceeds_capacity_and_keeps_newest() {
    let queue = BoundedDispatchQueue::new(3);
    let mut dropped = Vec::new();

    for i in 0..10 {
        if let PutOutcome::Displaced(old) = queue.try_put(build(&i.to_string())) {
            dropped.push(old.build_id.0);
        }
        assert!(queue.len() <= 3);
    }

    assert_eq!(ids(&queue), vec!["7", "8", "9"]);
    assert_eq!(dropped, vec!["0", "1", "2", "3", "4", "5", "6"]);
}

#[test]
fn zero_capacity_is_raised_to_one() {
    let queue = BoundedDispatchQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    let _ = queue.try_put(build("a"));
    assert!(matches!(queue.try_put(build("b")), PutOutcome::Displaced(_)));
    assert_eq!(ids(&queue), vec!["b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_evict_exactly_one_per_overflow() {
    let queue = Arc::new(BoundedDispatchQueue::new(10));
    let mut tasks = Vec::new();

    for producer in 0..4 {
        let queue = Arc::clone(&queue);
        tasks.push(tokio::spawn(async move {
            let mut displaced = 0usize;
            for i in 0..100 {
                let outcome = queue.try_put(build(&format!("{producer}-{i}")));
                assert!(outcome.is_admitted());
                if matches!(outcome, PutOutcome::Displaced(_)) {
                    displaced += 1;
                }
            }
            displaced
        }));
    }

    let mut displaced = 0;
    for task in tasks {
        displaced += task.await.unwrap();
    }

    assert_eq!(queue.len(), 10);
    assert_eq!(displaced, 390);
}

// ---------------------------------------------------------------------------
// Take and close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn take_on_closed_empty_queue_returns_immediately() {
    let queue = BoundedDispatchQueue::new(4);
    queue.close();

    let taken = tokio::time::timeout(Duration::from_secs(1), queue.take())
        .await
        .expect("take must not block on a closed queue");
    assert!(taken.is_none());
}

#[tokio::test]
async fn closed_queue_still_yields_remaining_in_fifo_order() {
    let queue = BoundedDispatchQueue::new(4);
    let _ = queue.try_put(build("a"));
    let _ = queue.try_put(build("b"));
    queue.close();

    assert_eq!(queue.take().await.unwrap().build_id.0, "a");
    assert_eq!(queue.take().await.unwrap().build_id.0, "b");
    assert!(queue.take().await.is_none());
}

#[tokio::test]
async fn put_after_close_hands_the_build_back() {
    let queue = BoundedDispatchQueue::new(4);
    queue.close();

    match queue.try_put(build("late")) {
        PutOutcome::Closed(event) => assert_eq!(event.build_id.0, "late"),
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(queue.is_empty());
}

#[tokio::test]
async fn take_waits_for_a_put() {
    let queue = Arc::new(BoundedDispatchQueue::new(4));

    let taker = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.take().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!taker.is_finished());

    let _ = queue.try_put(build("x"));
    let taken = tokio::time::timeout(Duration::from_secs(1), taker)
        .await
        .expect("taker should wake")
        .unwrap();
    assert_eq!(taken.unwrap().build_id.0, "x");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_wakes_every_waiting_consumer() {
    let queue = Arc::new(BoundedDispatchQueue::new(4));

    let takers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.close();

    for taker in takers {
        let taken = tokio::time::timeout(Duration::from_secs(1), taker)
            .await
            .expect("close should wake takers")
            .unwrap();
        assert!(taken.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn several_puts_reach_several_waiting_consumers() {
    let queue = Arc::new(BoundedDispatchQueue::new(8));

    let takers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    for i in 0..4 {
        let _ = queue.try_put(build(&i.to_string()));
    }

    let mut got = Vec::new();
    for taker in takers {
        let taken = tokio::time::timeout(Duration::from_secs(1), taker)
            .await
            .expect("every taker should get a build")
            .unwrap();
        got.push(taken.unwrap().build_id.0);
    }
    got.sort();
    assert_eq!(got, vec!["0", "1", "2", "3"]);
}
