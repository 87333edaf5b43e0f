//! Fixed-capacity bulk queues for moving batches of records between
//! partitioned cache workers.
use parking_lot::Mutex;
use std::collections::VecDeque;

struct Ring<T> {
    entries: VecDeque<T>,
    cap: usize,
}

/// A bounded FIFO of records with batched, non-blocking transfer in both
/// directions. The lock is only ever held for the record moves themselves;
/// callers deal with fullness and emptiness, typically by trying the next
/// peer or coming back around.
pub struct BulkQueue<T> {
    state: Mutex<Ring<T>>,
}

impl<T> BulkQueue<T> {
    pub fn new(cap: usize) -> Self {
        assert!(cap > 0);
        BulkQueue {
            state: Mutex::new(Ring {
                entries: VecDeque::with_capacity(cap),
                cap,
            }),
        }
    }

    /// Move up to `cap - len` records from the front of `entries` into the
    /// queue, preserving order. Whatever could not fit stays in `entries`.
    /// Returns how many records moved.
    pub fn add(&self, entries: &mut Vec<T>) -> usize {
        let mut state = self.state.lock();
        let n = entries.len().min(state.cap - state.entries.len());
        for e in entries.drain(..n) {
            state.entries.push_back(e);
        }
        n
    }

    /// Move up to `max` records from the head of the queue into `out`.
    /// Returns how many records moved.
    pub fn fetch(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut state = self.state.lock();
        let n = max.min(state.entries.len());
        out.extend(state.entries.drain(..n));
        n
    }

    /// Racy pre-check; a subsequent `add` may still move fewer records.
    pub fn is_full(&self) -> bool {
        let state = self.state.lock();
        state.entries.len() == state.cap
    }

    /// Racy pre-check; a subsequent `fetch` may still find nothing.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
