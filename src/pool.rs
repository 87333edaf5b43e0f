//! A pool of long-lived worker threads grouped by NUMA node, designed to
//! replace ad-hoc per-call parallelism while respecting data locality.
//!
//! Each node owns a task queue served by `threads_per_node` workers pinned
//! (best effort) to that node's cores. Submitters either name a node or let
//! the pool pick the least-loaded one. The pool never drops a task; callers
//! that need backpressure bound their own submissions against
//! [`WorkerPool::pending`], which is how the ingestion driver keeps itself
//! from outrunning the parser workers.
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Shape of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of NUMA nodes to spread workers over.
    pub num_nodes: usize,
    /// Worker threads per node.
    pub threads_per_node: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            num_nodes: 1,
            threads_per_node: num_cpus::get(),
        }
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

struct NodeQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    /// Tasks submitted to this node and not yet finished, used for
    /// least-loaded placement.
    load: AtomicUsize,
}

impl NodeQueue {
    fn new() -> Self {
        NodeQueue {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            load: AtomicUsize::new(0),
        }
    }
}

struct PoolShared {
    nodes: Vec<NodeQueue>,
    pending: Mutex<u64>,
    quiesced: Condvar,
    shutdown: AtomicBool,
}

/// A fixed set of worker threads with per-node task queues.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    num_workers: usize,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        assert!(config.num_nodes > 0 && config.threads_per_node > 0);
        let shared = Arc::new(PoolShared {
            nodes: (0..config.num_nodes).map(|_| NodeQueue::new()).collect(),
            pending: Mutex::new(0),
            quiesced: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let cores = core_affinity::get_core_ids().unwrap_or_default();
        let mut workers = Vec::new();
        for node in 0..config.num_nodes {
            for i in 0..config.threads_per_node {
                let shared = shared.clone();
                let core = if cores.is_empty() {
                    None
                } else {
                    let idx = node * config.threads_per_node + i;
                    Some(cores[idx % cores.len()])
                };
                let handle = thread::Builder::new()
                    .name(format!("lattice-worker-{}-{}", node, i))
                    .spawn(move || {
                        if let Some(core) = core {
                            core_affinity::set_for_current(core);
                        }
                        debug!("worker {} on node {} started", i, node);
                        worker_loop(&shared, node);
                    })
                    .expect("failed to spawn pool worker");
                workers.push(handle);
            }
        }
        let num_workers = config.num_nodes * config.threads_per_node;
        WorkerPool {
            shared,
            workers,
            num_workers,
        }
    }

    /// Total worker threads in the pool.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Enqueue a task on the given node, or on the least-loaded node when
    /// `node` is `None`. Tasks are never dropped.
    pub fn submit<F>(&self, node: Option<usize>, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let node = match node {
            Some(n) => n % self.shared.nodes.len(),
            None => self.least_loaded(),
        };
        {
            let mut pending = self.shared.pending.lock();
            *pending += 1;
        }
        let queue = &self.shared.nodes[node];
        queue.load.fetch_add(1, Ordering::SeqCst);
        queue.tasks.lock().push_back(Box::new(task));
        queue.available.notify_one();
    }

    /// The number of submitted tasks that have not finished running.
    pub fn pending(&self) -> u64 {
        *self.shared.pending.lock()
    }

    /// Block until every submitted task has finished.
    pub fn wait_for_quiescence(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.quiesced.wait(&mut pending);
        }
    }

    fn least_loaded(&self) -> usize {
        self.shared
            .nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| n.load.load(Ordering::SeqCst))
            .map(|(idx, _)| idx)
            .unwrap()
    }
}

fn worker_loop(shared: &PoolShared, node: usize) {
    let queue = &shared.nodes[node];
    loop {
        let task = {
            let mut tasks = queue.tasks.lock();
            loop {
                if let Some(task) = tasks.pop_front() {
                    break task;
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                queue.available.wait(&mut tasks);
            }
        };
        task();
        queue.load.fetch_sub(1, Ordering::SeqCst);
        let mut pending = shared.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            shared.quiesced.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for node in &self.shared.nodes {
            node.available.notify_all();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_runs_all_tasks() {
        let pool = WorkerPool::new(PoolConfig {
            num_nodes: 2,
            threads_per_node: 2,
        });
        assert_eq!(pool.num_workers(), 4);
        let counter = Arc::new(AtomicU64::new(0));
        for i in 0..100 {
            let counter = counter.clone();
            let node = if i % 3 == 0 { Some(i % 2) } else { None };
            pool.submit(node, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_quiescence();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_quiescence_waits_for_slow_tasks() {
        let pool = WorkerPool::new(PoolConfig {
            num_nodes: 1,
            threads_per_node: 2,
        });
        let done = Arc::new(AtomicU64::new(0));
        for _ in 0..4 {
            let done = done.clone();
            pool.submit(None, move || {
                thread::sleep(std::time::Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_quiescence();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }
}
