//! Per-key queue bridging push-style arrival and pull-style consumption
//!
//! A pipe has any number of producers and exactly one consumer. `push` never
//! blocks and never applies backpressure; the buffer grows without bound if
//! the consumer stalls.
//!
//! The consumer side takes `&mut self` in [`PipeReceiver::next`], so at most
//! one waiter can be outstanding. A second concurrent `next()` on the same
//! receiver does not compile:
//!
//! ```compile_fail
//! let (_tx, mut rx) = keydesk::pipe::pipe::<u32>();
//! let first = rx.next();
//! let second = rx.next();
//! drop((first, second));
//! ```
//!
//! Dropping the receiver closes the pipe and moves whatever it never read
//! into a [`Leftovers`] slot shared with the senders. An item is either
//! delivered to the consumer, handed back by `push`, or found in the
//! leftovers; it is never lost between the three.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Create a connected producer/consumer pair
pub fn pipe<T>() -> (PipeSender<T>, PipeReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let retired = Arc::new(Mutex::new(None));
    (
        PipeSender {
            tx,
            retired: Arc::clone(&retired),
        },
        PipeReceiver {
            rx,
            received: 0,
            retired,
        },
    )
}

/// Returned by [`PipeSender::push`] when the consumer is gone.
///
/// Carries the rejected item so the caller can route it elsewhere.
#[derive(Error)]
#[error("pipe consumer has been dropped")]
pub struct PipeClosed<T>(pub T);

impl<T> fmt::Debug for PipeClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PipeClosed(..)")
    }
}

/// What a dropped consumer left behind
#[derive(Debug, PartialEq, Eq)]
pub struct Leftovers<T> {
    /// Items pushed but never read, oldest first
    pub unread: Vec<T>,
    /// How many items the consumer did read
    pub received: u64,
}

type Slot<T> = Arc<Mutex<Option<Leftovers<T>>>>;

/// Handle on a pipe's leftovers that does not keep the pipe open
pub struct LeftoversHandle<T> {
    retired: Slot<T>,
}

impl<T> LeftoversHandle<T> {
    /// Take the leftovers once the consumer is gone.
    ///
    /// `None` while the consumer is alive, and after a previous `take`.
    pub fn take(&self) -> Option<Leftovers<T>> {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Producer half of a pipe
pub struct PipeSender<T> {
    tx: mpsc::UnboundedSender<T>,
    retired: Slot<T>,
}

impl<T> Clone for PipeSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            retired: Arc::clone(&self.retired),
        }
    }
}

impl<T> PipeSender<T> {
    /// Append an item, waking the consumer if it is suspended in `next()`.
    pub fn push(&self, item: T) -> Result<(), PipeClosed<T>> {
        self.tx.send(item).map_err(|e| PipeClosed(e.0))
    }

    /// Whether the consumer has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn leftovers(&self) -> LeftoversHandle<T> {
        LeftoversHandle {
            retired: Arc::clone(&self.retired),
        }
    }
}

/// Consumer half of a pipe
pub struct PipeReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    received: u64,
    retired: Slot<T>,
}

impl<T> PipeReceiver<T> {
    /// Wait for the oldest buffered item.
    ///
    /// Returns `None` once every sender has been dropped and the buffer is
    /// drained. Cancel-safe: dropping the future never loses an item.
    pub async fn next(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.received += 1;
        }
        item
    }

    /// Number of items pushed but not yet consumed
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl<T> Drop for PipeReceiver<T> {
    fn drop(&mut self) {
        // Close and drain under the lock: a push rejected after `close` can
        // only observe the slot once it is filled.
        let mut slot = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        self.rx.close();
        let mut unread = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            unread.push(item);
        }
        *slot = Some(Leftovers {
            unread,
            received: self.received,
        });
    }
}

impl<T> fmt::Debug for PipeReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReceiver")
            .field("pending", &self.pending())
            .field("received", &self.received)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_buffered_items_come_out_in_order() {
        let (tx, mut rx) = pipe();
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();
        assert_eq!(rx.pending(), 3);

        assert_eq!(rx.next().await, Some(1));
        assert_eq!(rx.next().await, Some(2));
        assert_eq!(rx.next().await, Some(3));
        assert_eq!(rx.pending(), 0);
    }

    #[tokio::test]
    async fn test_push_wakes_suspended_waiter() {
        let (tx, mut rx) = pipe::<&'static str>();

        let waiter = tokio::spawn(async move {
            let first = rx.next().await;
            let second = rx.next().await;
            (first, second, rx)
        });

        // Let the waiter park on the empty pipe
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.push("a").unwrap();
        tx.push("b").unwrap();

        let (first, second, rx) = waiter.await.unwrap();
        assert_eq!(first, Some("a"));
        assert_eq!(second, Some("b"));
        assert_eq!(rx.pending(), 0, "no duplicates left behind");
    }

    #[tokio::test]
    async fn test_next_returns_none_after_senders_drop() {
        let (tx, mut rx) = pipe();
        tx.push("last").unwrap();
        drop(tx);

        assert_eq!(rx.next().await, Some("last"));
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn test_push_hands_item_back_when_consumer_dropped() {
        let (tx, rx) = pipe();
        drop(rx);

        assert!(tx.is_closed());
        let err = tx.push(42).unwrap_err();
        assert_eq!(err.0, 42);
    }

    #[tokio::test]
    async fn test_dropped_consumer_leaves_unread_items() {
        let (tx, mut rx) = pipe();
        tx.push("read").unwrap();
        tx.push("late-1").unwrap();
        tx.push("late-2").unwrap();
        let leftovers = tx.leftovers();
        assert!(leftovers.take().is_none(), "consumer still alive");

        assert_eq!(rx.next().await, Some("read"));
        drop(rx);

        assert_eq!(tx.push("after").unwrap_err().0, "after");
        assert_eq!(
            leftovers.take(),
            Some(Leftovers {
                unread: vec!["late-1", "late-2"],
                received: 1,
            })
        );
        assert!(leftovers.take().is_none(), "taken once");
    }

    #[tokio::test]
    async fn test_leftovers_outlive_every_sender() {
        let (tx, rx) = pipe();
        tx.push(7).unwrap();
        let leftovers = tx.leftovers();
        drop(tx);
        drop(rx);

        let left = leftovers.take().unwrap();
        assert_eq!(left.unread, vec![7]);
        assert_eq!(left.received, 0);
    }

    #[tokio::test]
    async fn test_racing_producer_and_dropped_consumer_lose_nothing() {
        let (tx, mut rx) = pipe();
        let leftovers = tx.leftovers();

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..10 {
                match rx.next().await {
                    Some(item) => seen.push(item),
                    None => break,
                }
            }
            seen
        });

        let mut rejected = Vec::new();
        for i in 0..100u32 {
            if let Err(PipeClosed(item)) = tx.push(i) {
                rejected.push(item);
            }
            tokio::task::yield_now().await;
        }
        let mut all = consumer.await.unwrap();
        all.extend(leftovers.take().unwrap().unread);
        all.extend(rejected);
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let (tx, mut rx) = pipe();

        let mut producers = Vec::new();
        for p in 0..4u32 {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    tx.push((p, i)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        drop(tx);
        for producer in producers {
            producer.await.unwrap();
        }

        let mut last = [None::<u32>; 4];
        let mut total = 0;
        while let Some((p, i)) = rx.next().await {
            let slot = &mut last[p as usize];
            assert!(slot.map_or(true, |prev| prev < i), "per-producer order kept");
            *slot = Some(i);
            total += 1;
        }
        assert_eq!(total, 200);
    }

    proptest! {
        #[test]
        fn prop_fifo_for_any_sequence(items in proptest::collection::vec(any::<u16>(), 0..64)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let out = rt.block_on(async {
                let (tx, mut rx) = pipe();
                for item in &items {
                    tx.push(*item).unwrap();
                }
                drop(tx);
                let mut out = Vec::new();
                while let Some(item) = rx.next().await {
                    out.push(item);
                }
                out
            });
            prop_assert_eq!(out, items);
        }
    }
}
