//! Bounded outbound ASDU queue.
//!
//! Producers (the periodic reporter, [`Station::enqueue_asdu`]) never wait:
//! when the queue is full the oldest entry is evicted. The owning session
//! is woken through a [`Notify`] and drains entries in FIFO order.
//!
//! [`Station::enqueue_asdu`]: crate::Station::enqueue_asdu

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::types::Asdu;

/// An ASDU waiting in an [`OutboundQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAsdu {
    /// Enqueue order, strictly increasing per queue
    pub seq: u64,
    pub asdu: Asdu,
}

/// Bounded FIFO with drop-oldest eviction.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: Mutex<VecDeque<QueuedAsdu>>,
    capacity: usize,
    next_seq: AtomicU64,
    dropped: AtomicU64,
    notify: Notify,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` entries (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedAsdu>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `asdu`, evicting and returning the oldest entry if full.
    pub fn enqueue(&self, asdu: Asdu) -> Option<QueuedAsdu> {
        let evicted = {
            let mut entries = self.lock();
            let evicted = if entries.len() >= self.capacity {
                entries.pop_front()
            } else {
                None
            };
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            entries.push_back(QueuedAsdu { seq, asdu });
            evicted
        };

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Take the oldest entry.
    pub fn pop(&self) -> Option<QueuedAsdu> {
        self.lock().pop_front()
    }

    /// Drop every pending entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Resolves after the next enqueue. A notification issued while nobody
    /// was waiting is kept, so an enqueue is never missed between a drain
    /// and the following wait.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cot, Ioa, MeasuredValueScaled, Quality, TypeId};

    fn periodic(value: i16) -> Asdu {
        let mut asdu = Asdu::new(TypeId::MeasuredScaled, Cot::Periodic, 1);
        asdu.add_object(MeasuredValueScaled {
            ioa: Ioa::new(110),
            value,
            quality: Quality::GOOD,
        })
        .unwrap();
        asdu
    }

    fn value_of(entry: &QueuedAsdu) -> i16 {
        match entry.asdu.first_object() {
            Some(crate::types::InformationObject::MeasuredScaled(m)) => m.value,
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = OutboundQueue::new(4);
        for v in 0..3 {
            assert!(queue.enqueue(periodic(v)).is_none());
        }
        assert_eq!(queue.len(), 3);

        let drained: Vec<i16> = std::iter::from_fn(|| queue.pop()).map(|e| value_of(&e)).collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let queue = OutboundQueue::new(3);
        for v in 0..3 {
            queue.enqueue(periodic(v));
        }

        let evicted = queue.enqueue(periodic(3)).unwrap();
        assert_eq!(value_of(&evicted), 0);
        assert_eq!(evicted.seq, 0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);

        for v in 4..10 {
            queue.enqueue(periodic(v));
            assert!(queue.len() <= queue.capacity());
        }

        let drained: Vec<i16> = std::iter::from_fn(|| queue.pop()).map(|e| value_of(&e)).collect();
        assert_eq!(drained, vec![7, 8, 9]);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let queue = OutboundQueue::new(2);
        for v in 0..5 {
            queue.enqueue(periodic(v));
        }
        let a = queue.pop().unwrap();
        let b = queue.pop().unwrap();
        assert_eq!((a.seq, b.seq), (3, 4));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = OutboundQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(periodic(1));
        assert!(queue.enqueue(periodic(2)).is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear() {
        let queue = OutboundQueue::new(8);
        queue.enqueue(periodic(1));
        queue.enqueue(periodic(2));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_notified_after_enqueue() {
        let queue = std::sync::Arc::new(OutboundQueue::new(8));
        let producer = queue.clone();

        let waiter = tokio::spawn(async move {
            producer.notified().await;
            producer.pop()
        });
        tokio::task::yield_now().await;
        queue.enqueue(periodic(42));

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(value_of(&entry), 42);
    }
}
