//! DispatchQueue tests — rendezvous hand-off, ordering, close and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use wsd_dispatch::DispatchQueue;
use wsd_protocol::DispatchError;

const WAIT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Hand-off
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_waits_for_take() {
    let queue = DispatchQueue::new();
    let delivered = Arc::new(AtomicBool::new(false));

    let producer = {
        let queue = queue.clone();
        let delivered = delivered.clone();
        tokio::spawn(async move {
            queue.put("hello".to_string()).await.unwrap();
            delivered.store(true, Ordering::SeqCst);
        })
    };

    sleep(Duration::from_millis(50)).await;
    assert!(!delivered.load(Ordering::SeqCst), "put returned without a taker");

    let item = timeout(WAIT, queue.take()).await.unwrap().unwrap();
    assert_eq!(item, "hello");
    timeout(WAIT, producer).await.unwrap().unwrap();
    assert!(delivered.load(Ordering::SeqCst));
}

#[tokio::test]
async fn take_waits_for_put() {
    let queue = DispatchQueue::new();
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.take().await })
    };

    sleep(Duration::from_millis(20)).await;
    assert!(!consumer.is_finished());

    timeout(WAIT, queue.put(7u32)).await.unwrap().unwrap();
    assert_eq!(timeout(WAIT, consumer).await.unwrap().unwrap(), Ok(7));
}

#[tokio::test]
async fn delivers_in_put_order() {
    let queue = DispatchQueue::new();
    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for i in 0..100u32 {
                queue.put(i).await.unwrap();
            }
        })
    };

    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.push(timeout(WAIT, queue.take()).await.unwrap().unwrap());
    }
    timeout(WAIT, producer).await.unwrap().unwrap();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn concurrent_producers_do_not_interleave() {
    let queue = DispatchQueue::new();

    let first = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put("first".to_string()).await })
    };
    // let the first producer queue up before the second one
    sleep(Duration::from_millis(20)).await;
    let second = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put("second".to_string()).await })
    };
    sleep(Duration::from_millis(20)).await;

    assert_eq!(timeout(WAIT, queue.take()).await.unwrap().unwrap(), "first");
    timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    assert!(!second.is_finished(), "second put finished before its item was taken");

    assert_eq!(timeout(WAIT, queue.take()).await.unwrap().unwrap(), "second");
    timeout(WAIT, second).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn abandoned_take_does_not_swallow_item() {
    let queue = DispatchQueue::new();

    // a taker that gives up before anything arrives
    let gave_up = timeout(Duration::from_millis(20), queue.take()).await;
    assert!(gave_up.is_err());

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put(42u8).await })
    };
    assert_eq!(timeout(WAIT, queue.take()).await.unwrap().unwrap(), 42);
    timeout(WAIT, producer).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn take_dropped_after_hand_off_returns_item_to_producer() {
    let queue = DispatchQueue::new();

    // register a taker, then stop polling it
    let mut take = Box::pin(queue.take());
    assert!(timeout(Duration::from_millis(10), &mut take).await.is_err());

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put(7u32).await })
    };
    sleep(Duration::from_millis(20)).await;
    assert!(!producer.is_finished(), "put reported success before the item was accepted");

    drop(take);
    assert_eq!(timeout(WAIT, queue.take()).await.unwrap(), Ok(7));
    assert_eq!(timeout(WAIT, producer).await.unwrap().unwrap(), Ok(()));
}

#[tokio::test]
async fn cancelled_hand_off_is_not_accepted_later() {
    let queue = DispatchQueue::new();
    let cancel = CancellationToken::new();

    let mut take = Box::pin(queue.take());
    assert!(timeout(Duration::from_millis(10), &mut take).await.is_err());

    let producer = {
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.put_cancellable(9u32, &cancel).await })
    };
    sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    assert_eq!(
        timeout(WAIT, producer).await.unwrap().unwrap(),
        Err(DispatchError::Cancelled)
    );

    // the slow taker never sees the item its producer reported as failed
    assert!(timeout(Duration::from_millis(50), &mut take).await.is_err());
    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put(10u32).await })
    };
    assert_eq!(timeout(WAIT, &mut take).await.unwrap(), Ok(10));
    timeout(WAIT, producer).await.unwrap().unwrap().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Close
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_releases_pending_put() {
    let queue = DispatchQueue::new();
    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put("never".to_string()).await })
    };
    sleep(Duration::from_millis(20)).await;

    queue.close();
    let result = timeout(WAIT, producer).await.unwrap().unwrap();
    assert_eq!(result, Err(DispatchError::QueueClosed));

    // the item is gone for good
    assert_eq!(queue.take().await, Err(DispatchError::QueueClosed));
}

#[tokio::test]
async fn close_releases_pending_take() {
    let queue: DispatchQueue<String> = DispatchQueue::new();
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.take().await })
    };
    sleep(Duration::from_millis(20)).await;

    queue.close();
    let result = timeout(WAIT, consumer).await.unwrap().unwrap();
    assert_eq!(result, Err(DispatchError::QueueClosed));
}

#[tokio::test]
async fn close_is_idempotent_and_sticky() {
    let queue = DispatchQueue::new();
    assert!(!queue.is_closed());
    queue.close();
    queue.close();
    assert!(queue.is_closed());
    assert_eq!(queue.put(1).await, Err(DispatchError::QueueClosed));
    assert_eq!(queue.take().await, Err(DispatchError::QueueClosed));
}

#[tokio::test]
async fn close_releases_every_waiting_producer() {
    let queue = DispatchQueue::new();
    let producers: Vec<_> = (0..4)
        .map(|i| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(i).await })
        })
        .collect();
    sleep(Duration::from_millis(20)).await;

    queue.close();
    for producer in producers {
        let result = timeout(WAIT, producer).await.unwrap().unwrap();
        assert_eq!(result, Err(DispatchError::QueueClosed));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_put_is_not_delivered() {
    let queue = DispatchQueue::new();
    let cancel = CancellationToken::new();

    let producer = {
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.put_cancellable("dropped", &cancel).await })
    };
    sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = timeout(WAIT, producer).await.unwrap().unwrap();
    assert_eq!(result, Err(DispatchError::Cancelled));
    assert!(result.unwrap_err().is_retryable());

    // the queue itself is still usable
    assert!(!queue.is_closed());
    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.put("kept").await })
    };
    assert_eq!(timeout(WAIT, queue.take()).await.unwrap().unwrap(), "kept");
    timeout(WAIT, producer).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn put_cancellable_succeeds_when_taken() {
    let queue = DispatchQueue::new();
    let cancel = CancellationToken::new();
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.take().await })
    };

    timeout(WAIT, queue.put_cancellable(5, &cancel)).await.unwrap().unwrap();
    assert_eq!(timeout(WAIT, consumer).await.unwrap().unwrap(), Ok(5));
}
