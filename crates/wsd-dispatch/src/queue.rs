//! DispatchQueue — single-slot rendezvous between frame delivery and handlers.
//!
//! A `put` completes only when a `take` receives its item: there is no
//! buffer, so at most one message is ever between the reading path and the
//! handler path of a connection. Waiting producers are admitted in the order
//! they called `put` (tokio's mutex is fair), which gives FIFO delivery with
//! no interleaving.
//!
//! Takers park a oneshot sender in a waiter list; the admitted producer pulls
//! the next live waiter and sends it the item together with an answer
//! channel. The producer only reports success once the taker has accepted
//! the item, and a taker dropped in between hands the item back. Closing the
//! queue wakes everybody with [`DispatchError::QueueClosed`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wsd_protocol::{DispatchError, DispatchResult};

/// An item on its way to a taker. `answer` carries `Ok` once the taker owns
/// the item, or the item itself if the taker went away first.
struct Delivery<T> {
    item: T,
    answer: oneshot::Sender<Result<(), T>>,
}

type Waiter<T> = oneshot::Sender<Delivery<T>>;

/// A registered `take`. Dropping it returns a delivery that already arrived
/// but was never accepted.
struct PendingTake<T> {
    rx: oneshot::Receiver<Delivery<T>>,
}

impl<T> Drop for PendingTake<T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(delivery) = self.rx.try_recv() {
            let _ = delivery.answer.send(Err(delivery.item));
        }
    }
}

struct Inner<T> {
    waiters_tx: mpsc::UnboundedSender<Waiter<T>>,
    /// Held by the producer currently handing off; the lock queue is the
    /// producer queue.
    waiters_rx: Mutex<mpsc::UnboundedReceiver<Waiter<T>>>,
    closed: CancellationToken,
}

/// Rendezvous channel with capacity one. Clones share the same channel.
pub struct DispatchQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DispatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for DispatchQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Default for DispatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DispatchQueue<T> {
    pub fn new() -> Self {
        let (waiters_tx, waiters_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                waiters_tx,
                waiters_rx: Mutex::new(waiters_rx),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Hand `item` to a consumer, waiting until one has accepted it.
    ///
    /// Fails with `QueueClosed` if the queue is or becomes closed before the
    /// hand-off; the item is then dropped undelivered. Dropping the returned
    /// future before it completes cancels the hand-off the same way.
    pub async fn put(&self, item: T) -> DispatchResult<()> {
        self.hand_off(item, None).await
    }

    /// Like [`put`](Self::put), but gives up with `Cancelled` when `cancel`
    /// fires first. The item is not delivered in that case.
    pub async fn put_cancellable(&self, item: T, cancel: &CancellationToken) -> DispatchResult<()> {
        self.hand_off(item, Some(cancel)).await
    }

    async fn hand_off(&self, item: T, cancel: Option<&CancellationToken>) -> DispatchResult<()> {
        let closed = &self.inner.closed;
        if closed.is_cancelled() {
            return Err(DispatchError::QueueClosed);
        }

        let mut waiters = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(DispatchError::QueueClosed),
            _ = cancelled(cancel) => return Err(DispatchError::Cancelled),
            waiters = self.inner.waiters_rx.lock() => waiters,
        };

        let mut item = item;
        loop {
            let waiter = tokio::select! {
                biased;
                _ = closed.cancelled() => return Err(DispatchError::QueueClosed),
                _ = cancelled(cancel) => return Err(DispatchError::Cancelled),
                waiter = waiters.recv() => waiter,
            };
            // `inner` holds a sender, so `None` only happens during teardown
            let Some(waiter) = waiter else {
                return Err(DispatchError::QueueClosed);
            };

            let (answer, mut answer_rx) = oneshot::channel();
            if let Err(returned) = waiter.send(Delivery { item, answer }) {
                // That taker gave up before we reached it
                item = returned.item;
                continue;
            }

            let answer = tokio::select! {
                biased;
                answer = &mut answer_rx => answer,
                _ = closed.cancelled() => return settle(answer_rx, DispatchError::QueueClosed),
                _ = cancelled(cancel) => return settle(answer_rx, DispatchError::Cancelled),
            };
            match answer {
                Ok(Ok(())) => return Ok(()),
                // Dropped before accepting; offer the item to the next taker
                Ok(Err(returned)) => item = returned,
                Err(_) => return Err(DispatchError::QueueClosed),
            }
        }
    }

    /// Wait for the next item.
    ///
    /// Fails with `QueueClosed` once the queue is closed. An item whose
    /// hand-off raced with `close` is still returned. Dropping the future
    /// gives an item that already arrived back to its producer.
    pub async fn take(&self) -> DispatchResult<T> {
        loop {
            if self.inner.closed.is_cancelled() {
                return Err(DispatchError::QueueClosed);
            }

            let (tx, rx) = oneshot::channel();
            self.inner
                .waiters_tx
                .send(tx)
                .map_err(|_| DispatchError::QueueClosed)?;
            let mut pending = PendingTake { rx };

            let delivery = tokio::select! {
                biased;
                delivery = &mut pending.rx => delivery.ok(),
                _ = self.inner.closed.cancelled() => {
                    pending.rx.close();
                    pending.rx.try_recv().ok()
                }
            };
            let Some(Delivery { item, answer }) = delivery else {
                continue;
            };
            if answer.send(Ok(())).is_ok() {
                return Ok(item);
            }
            // The producer was cancelled before we accepted; it reported
            // failure, so the item is not ours to deliver.
        }
    }

    /// Close the queue. Idempotent. Every pending and future `put`/`take`
    /// fails with `QueueClosed`.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

/// Settle a hand-off interrupted while waiting for the taker's answer. An
/// answer that already arrived wins over the interruption.
fn settle<T>(mut answer_rx: oneshot::Receiver<Result<(), T>>, error: DispatchError) -> DispatchResult<()> {
    answer_rx.close();
    match answer_rx.try_recv() {
        Ok(Ok(())) => Ok(()),
        _ => Err(error),
    }
}

fn cancelled(cancel: Option<&CancellationToken>) -> impl Future<Output = ()> + Send + '_ {
    async move {
        match cancel {
            Some(cancel) => cancel.cancelled().await,
            None => std::future::pending().await,
        }
    }
}
