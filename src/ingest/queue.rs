//! The bounded queue of completed data frames sitting between the parse
//! workers (many producers) and the merging driver (one consumer).
use crate::dataframe::DataFrame;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

struct QueueState {
    frames: Vec<DataFrame>,
    wait_for_fetch: bool,
    wait_for_add: bool,
}

/// A blocking multi-producer single-consumer queue with a hard capacity.
///
/// Both blocking operations wake the other side *before* suspending: a full
/// producer first signals a waiting consumer, an empty consumer first wakes
/// every waiting producer. Skipping either signal deadlocks when both sides
/// reach their blocking point at the same time.
pub struct FrameQueue {
    cap: usize,
    count: AtomicU64,
    state: Mutex<QueueState>,
    add_cond: Condvar,
    fetch_cond: Condvar,
}

impl FrameQueue {
    pub fn new(cap: usize) -> Self {
        assert!(cap > 0);
        FrameQueue {
            cap,
            count: AtomicU64::new(0),
            state: Mutex::new(QueueState {
                frames: Vec::new(),
                wait_for_fetch: false,
                wait_for_add: false,
            }),
            add_cond: Condvar::new(),
            fetch_cond: Condvar::new(),
        }
    }

    /// Add a frame, blocking while the queue is at capacity. There is only
    /// one consumer, so one signal is enough to guarantee its liveness.
    pub fn push(&self, frame: DataFrame) {
        let mut state = self.state.lock();
        while state.frames.len() >= self.cap {
            if state.wait_for_fetch {
                self.fetch_cond.notify_one();
            }
            state.wait_for_add = true;
            self.add_cond.wait(&mut state);
            state.wait_for_add = false;
        }
        state.frames.push(frame);
        self.count.store(state.frames.len() as u64, Ordering::SeqCst);
        drop(state);
        self.fetch_cond.notify_one();
    }

    /// Remove and return every queued frame, blocking while the queue is
    /// empty. Multiple producers may be parked at once, so they are woken
    /// by broadcast.
    pub fn drain_all(&self) -> Vec<DataFrame> {
        let mut state = self.state.lock();
        while state.frames.is_empty() {
            if state.wait_for_add {
                self.add_cond.notify_all();
            }
            state.wait_for_fetch = true;
            self.fetch_cond.wait(&mut state);
            state.wait_for_fetch = false;
        }
        let frames = std::mem::take(&mut state.frames);
        self.count.store(0, Ordering::SeqCst);
        drop(state);
        self.add_cond.notify_all();
        frames
    }

    /// How many frames are queued right now. Racy by nature; the driver
    /// only uses it to decide whether a drain would block.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::{Column, DataFrame};
    use crossbeam_utils::thread;

    fn tiny_frame(v: i64) -> DataFrame {
        DataFrame::from(vec![("source".to_string(), Column::I64(vec![v]))])
    }

    #[test]
    fn test_push_then_drain() {
        let q = FrameQueue::new(4);
        q.push(tiny_frame(1));
        q.push(tiny_frame(2));
        assert_eq!(q.count(), 2);
        let drained = q.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn test_producers_block_at_capacity() {
        // 4 producers, queue of 2: every push must land even though
        // producers have to park and be woken by drains.
        let q = FrameQueue::new(2);
        let mut total = 0;
        thread::scope(|s| {
            for t in 0..4 {
                let q = &q;
                s.spawn(move |_| {
                    for i in 0..50 {
                        q.push(tiny_frame(t * 100 + i));
                    }
                });
            }
            while total < 200 {
                total += q.drain_all().len();
            }
        })
        .unwrap();
        assert_eq!(total, 200);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn test_consumer_blocks_until_push() {
        let q = FrameQueue::new(2);
        thread::scope(|s| {
            let q = &q;
            s.spawn(move |_| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                q.push(tiny_frame(7));
            });
            let drained = q.drain_all();
            assert_eq!(drained.len(), 1);
        })
        .unwrap();
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let q = FrameQueue::new(3);
        thread::scope(|s| {
            for _ in 0..3 {
                let q = &q;
                s.spawn(move |_| {
                    for i in 0..40 {
                        q.push(tiny_frame(i));
                        assert!(q.count() <= 3);
                    }
                });
            }
            let mut seen = 0;
            while seen < 120 {
                seen += q.drain_all().len();
                assert_eq!(q.count(), 0);
            }
        })
        .unwrap();
    }
}
