//! Bounded FIFO hand-off queues between pipeline stages.
//!
//! A queue is multi-producer and multi-consumer: receivers are cloned and
//! compete for items, so each item is delivered to exactly one receiver.
//! Capacity is the only backpressure mechanism in the pipeline. A capacity of
//! zero gives a synchronous hand-off where `send` completes only once a
//! receiver has taken the item.
//!
//! Closing is explicit and authoritative: after [`QueueSender::close`] every
//! new `send` fails immediately, while items already buffered can still be
//! received. [`QueueReceiver::recv`] yields `None` once the queue is closed
//! and drained.
//!
//! `send` and `recv` are cancel-safe with respect to the queue state, so they
//! can be raced against a cancellation token in `tokio::select!`. A dropped
//! zero-capacity `send` withdraws its item unless a receiver already took it.
//! When the caller must know which of the two happened, use
//! [`QueueSender::send_until`]: `Ok` means the item was delivered, and
//! [`SendError::Cancelled`] hands back an item no receiver will ever see.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Returned by `send` when the queue has been closed; carries the item back
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T: fmt::Debug> std::error::Error for QueueClosed<T> {}

/// Returned by [`QueueSender::send_until`]; the item was not enqueued
#[derive(Debug, PartialEq, Eq)]
pub enum SendError<T> {
    Closed(T),
    Cancelled(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(item) | SendError::Cancelled(item) => item,
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(_) => f.write_str("queue is closed"),
            SendError::Cancelled(_) => f.write_str("send cancelled"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Zero-capacity items sit in a shared slot; whoever empties it owns the item
type Slot<T> = Arc<Mutex<Option<T>>>;

enum Envelope<T> {
    Buffered(T),
    HandOff {
        slot: Slot<T>,
        taken: oneshot::Sender<()>,
    },
}

struct Shared<T> {
    /// `None` once the queue is closed
    tx: Mutex<Option<mpsc::Sender<Envelope<T>>>>,
    depth: AtomicUsize,
    capacity: usize,
}

/// Withdraws a pending hand-off if the sending future goes away first
struct PendingHandOff<'a, T> {
    slot: Slot<T>,
    shared: &'a Shared<T>,
    settled: bool,
}

impl<T> PendingHandOff<'_, T> {
    /// `Some` if the item was still waiting for a receiver
    fn withdraw(&mut self) -> Option<T> {
        self.settled = true;
        let item = self.slot.lock().take();
        if item.is_some() {
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }
}

impl<T> Drop for PendingHandOff<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.withdraw();
        }
    }
}

/// Producer side of a pipeline queue
pub struct QueueSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer side of a pipeline queue
pub struct QueueReceiver<T> {
    shared: Arc<Shared<T>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope<T>>>>,
}

/// Create a bounded queue
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        tx: Mutex::new(Some(tx)),
        depth: AtomicUsize::new(0),
        capacity,
    });

    (
        QueueSender {
            shared: shared.clone(),
        },
        QueueReceiver {
            shared,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        },
    )
}

impl<T> QueueSender<T> {
    /// Offer an item, waiting while the queue is full
    pub async fn send(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.send_until(item, &CancellationToken::new())
            .await
            .map_err(|e| QueueClosed(e.into_inner()))
    }

    /// Offer an item, giving up when `cancel` fires.
    ///
    /// Cancellation that races a receiver taking the item resolves in the
    /// receiver's favour and returns `Ok`.
    pub async fn send_until(&self, item: T, cancel: &CancellationToken) -> Result<(), SendError<T>> {
        let Some(tx) = self.shared.tx.lock().clone() else {
            return Err(SendError::Closed(item));
        };

        // Reserve first so the depth counter never lags a buffered item.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Cancelled(item)),
            reserved = tx.reserve() => match reserved {
                Ok(permit) => permit,
                Err(_) => return Err(SendError::Closed(item)),
            },
        };
        self.shared.depth.fetch_add(1, Ordering::SeqCst);

        if self.shared.capacity > 0 {
            permit.send(Envelope::Buffered(item));
            return Ok(());
        }

        let slot = Arc::new(Mutex::new(Some(item)));
        let (taken, ack) = oneshot::channel();
        permit.send(Envelope::HandOff {
            slot: slot.clone(),
            taken,
        });
        drop(tx);

        let mut pending = PendingHandOff {
            slot,
            shared: &self.shared,
            settled: false,
        };

        tokio::select! {
            biased;
            acked = ack => match acked {
                Ok(()) => {
                    pending.settled = true;
                    Ok(())
                }
                // Every receiver is gone; the envelope was dropped unread.
                Err(_) => match pending.withdraw() {
                    Some(item) => Err(SendError::Closed(item)),
                    None => Ok(()),
                },
            },
            _ = cancel.cancelled() => match pending.withdraw() {
                Some(item) => Err(SendError::Cancelled(item)),
                None => Ok(()),
            },
        }
    }

    /// Stop accepting new items. Buffered items stay receivable.
    pub fn close(&self) {
        self.shared.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.tx.lock().is_none()
    }

    /// Number of items currently buffered
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl<T> QueueReceiver<T> {
    /// Take the next item, waiting while the queue is empty. Returns `None`
    /// once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let envelope = {
                let mut rx = self.rx.lock().await;
                rx.recv().await?
            };

            match envelope {
                Envelope::Buffered(item) => {
                    self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                    return Some(item);
                }
                Envelope::HandOff { slot, taken } => {
                    let item = slot.lock().take();
                    // An empty slot was withdrawn by its sender.
                    if let Some(item) = item {
                        self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                        let _ = taken.send(());
                        return Some(item);
                    }
                }
            }
        }
    }

    /// Number of items currently buffered
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        QueueSender {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        QueueReceiver {
            shared: self.shared.clone(),
            rx: self.rx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, rx) = bounded(4);
        for i in 0..4 {
            tx.send(i).await.unwrap();
        }
        assert_eq!(tx.len(), 4);

        for i in 0..4 {
            assert_eq!(rx.recv().await, Some(i));
        }
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_close_rejects_new_items_and_drains_buffered() {
        let (tx, rx) = bounded(4);
        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();

        tx.close();
        assert!(tx.is_closed());
        assert_eq!(tx.send("c").await, Err(QueueClosed("c")));

        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_is_seen_by_clones() {
        let (tx, rx) = bounded::<u8>(1);
        let other = tx.clone();

        tx.close();
        assert_eq!(other.send(1).await, Err(QueueClosed(1)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_sender() {
        let (tx, rx) = bounded(1);
        tx.send(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(2)).await;
        assert!(blocked.is_err(), "send should wait while the queue is full");

        assert_eq!(rx.recv().await, Some(1));
        tx.send(3).await.unwrap();
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_is_synchronous_handoff() {
        let (tx, rx) = bounded(0);
        assert_eq!(tx.capacity(), 0);

        let sender = tokio::spawn(async move {
            tx.send("job").await.unwrap();
            tokio::time::Instant::now()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!sender.is_finished(), "send must wait for a receiver");

        let taken_at = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some("job"));
        let sent_at = sender.await.unwrap();
        assert!(sent_at >= taken_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_zero_capacity_send_is_withdrawn() {
        let (tx, rx) = bounded::<u32>(0);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), tx.send(7)).await;
        assert!(abandoned.is_err());
        assert!(tx.is_empty());

        tx.close();
        assert_eq!(rx.recv().await, None);
        assert!(rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_until_returns_item_on_cancel() {
        let (tx, rx) = bounded::<u32>(0);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert_eq!(tx.send_until(7, &cancel).await, Err(SendError::Cancelled(7)));
        assert!(tx.is_empty());

        // The withdrawn envelope does not shadow later items.
        let sender = tokio::spawn(async move { tx.send(8).await });
        assert_eq!(rx.recv().await, Some(8));
        sender.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_until_on_full_buffer() {
        let (tx, rx) = bounded(1);
        tx.send(1).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(tx.send_until(2, &cancel).await, Err(SendError::Cancelled(2)));
        assert_eq!(rx.recv().await, Some(1));

        tx.close();
        assert_eq!(
            tx.send_until(3, &CancellationToken::new()).await,
            Err(SendError::Closed(3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_send_fails_when_receivers_dropped() {
        let (tx, rx) = bounded::<u32>(0);
        let sender = tokio::spawn(async move { tx.send(5).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(rx);
        assert_eq!(sender.await.unwrap(), Err(QueueClosed(5)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_receivers_get_each_item_once() {
        let (tx, rx) = bounded(8);

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let rx = rx.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = rx.recv().await {
                    seen.push(item);
                }
                seen
            }));
        }

        for i in 0..200u32 {
            tx.send(i).await.unwrap();
        }
        tx.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }

        assert_eq!(all.len(), 200);
        let unique: HashSet<u32> = all.into_iter().collect();
        assert_eq!(unique.len(), 200);
    }
}
