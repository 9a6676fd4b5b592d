//! Bounded FIFO pools handing out exclusive ownership of operators and
//! users to worker threads.
//!
//! The channel hand-off is the synchronization point: an item is mutated
//! only by the worker currently holding it. Capacity equals the initial
//! item count, so `give` never blocks and the total of queued plus
//! in-flight items is conserved.

use crossbeam_channel::{bounded, Receiver, Sender};

pub struct Pool<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        let (sender, receiver) = bounded(capacity);
        for item in items {
            sender.send(item).expect("pool channel disconnected");
        }
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Blocks until an item is available.
    pub fn take(&self) -> T {
        self.receiver.recv().expect("pool channel disconnected")
    }

    /// Returns a previously taken item. Every `take` must be paired with
    /// exactly one `give`.
    pub fn give(&self, item: T) {
        self.sender.send(item).expect("pool channel disconnected");
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_give_fifo() {
        let pool = Pool::new(vec![1, 2, 3]);
        assert_eq!(pool.len(), 3);
        let first = pool.take();
        assert_eq!(first, 1);
        pool.give(first);
        // the returned item goes to the back of the queue
        assert_eq!(pool.take(), 2);
        assert_eq!(pool.take(), 3);
        assert_eq!(pool.take(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_conservation_across_threads() {
        let pool = Arc::new(Pool::new((0..10u64).collect()));
        let mut handles = vec![];
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let a = pool.take();
                    let b = pool.take();
                    pool.give(a);
                    pool.give(b);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.len(), pool.capacity());

        let mut items: Vec<u64> = (0..10).map(|_| pool.take()).collect();
        items.sort_unstable();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }
}
