//! Partitioned cache workers: each worker owns a slice of the cache and a
//! pair of bulk queues; requests are hashed to the owning NUMA group,
//! forwarded to a peer there, executed against that group's shared
//! [`BlockStore`], and the replies routed back to the worker that issued
//! them.
use crate::cache::queue::BulkQueue;
use crate::cache::request::{
    AccessMethod, BufferPool, IoReply, IoRequest, WorkerId,
};
use crate::cache::store::BlockStore;
use crate::error::LatticeError;
use crate::PAGE_SIZE;
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shape and sizing of a partitioned cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of NUMA groups the cache is partitioned over.
    pub num_groups: usize,
    /// Workers per group.
    pub threads_per_group: usize,
    /// Total page-cache budget, split evenly across the groups.
    pub cache_bytes: usize,
    /// Capacity of every request and reply queue.
    pub queue_cap: usize,
    /// Records staged per peer before a bulk push.
    pub staging_buf: usize,
    /// I/O buffers per worker; bounds each worker's requests in flight.
    pub pool_entries: usize,
    /// Byte size of each I/O buffer.
    pub entry_size: usize,
    /// Check successful READ replies against the backing file's test
    /// pattern (the first eight buffer bytes must equal `offset / 8`).
    pub verify_replies: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            num_groups: 1,
            threads_per_group: num_cpus::get(),
            cache_bytes: 64 * 1024 * 1024,
            queue_cap: 1024,
            staging_buf: 64,
            pool_entries: 1024,
            entry_size: PAGE_SIZE,
            verify_replies: false,
        }
    }
}

/// The queue pair and termination flag of one worker, shared so peers can
/// push to it.
pub(crate) struct WorkerShared {
    id: WorkerId,
    group: usize,
    request_q: BulkQueue<IoRequest>,
    reply_q: BulkQueue<IoReply>,
    /// Incremented once by every worker (including this one) on entering
    /// cleanup; doubles as the termination probe.
    finished: AtomicUsize,
}

struct GroupState {
    cache: Mutex<Option<Arc<BlockStore>>>,
}

/// Everything the workers of one partitioned cache share: the per-group
/// store slots, every worker's queue pair, and the initialization barrier.
/// Passed explicitly to each [`CacheWorker`]; there is no process-global
/// state.
pub struct CacheContext {
    cfg: CacheConfig,
    backing: PathBuf,
    groups: Vec<GroupState>,
    workers: Vec<Arc<WorkerShared>>,
    num_finish_init: Mutex<usize>,
    init_cond: Condvar,
}

impl CacheContext {
    /// Set up the shared state for `num_groups * threads_per_group` workers
    /// over the backing file at `backing`.
    pub fn new(cfg: CacheConfig, backing: impl AsRef<Path>) -> Arc<Self> {
        assert!(cfg.num_groups > 0 && cfg.threads_per_group > 0);
        let total = cfg.num_groups * cfg.threads_per_group;
        let workers = (0..total)
            .map(|id| {
                Arc::new(WorkerShared {
                    id,
                    group: id % cfg.num_groups,
                    request_q: BulkQueue::new(cfg.queue_cap),
                    reply_q: BulkQueue::new(cfg.queue_cap),
                    finished: AtomicUsize::new(0),
                })
            })
            .collect();
        let groups = (0..cfg.num_groups)
            .map(|_| GroupState {
                cache: Mutex::new(None),
            })
            .collect();
        info!(
            "cache is partitioned over {} groups of {} workers",
            cfg.num_groups, cfg.threads_per_group
        );
        Arc::new(CacheContext {
            cfg,
            backing: backing.as_ref().to_path_buf(),
            groups,
            workers,
            num_finish_init: Mutex::new(0),
            init_cond: Condvar::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn total_workers(&self) -> usize {
        self.workers.len()
    }

    /// The thread-local half of worker `id`. Call [`CacheWorker::thread_init`]
    /// from the thread that will run it before anything else.
    pub fn worker(self: &Arc<Self>, id: WorkerId) -> CacheWorker {
        assert!(id < self.workers.len());
        CacheWorker {
            shared: self.workers[id].clone(),
            ctx: self.clone(),
            cache: None,
            pending_reqs: (0..self.cfg.num_groups)
                .map(|_| Vec::with_capacity(self.cfg.staging_buf))
                .collect(),
            pending_replies: (0..self.workers.len())
                .map(|_| Vec::with_capacity(self.cfg.staging_buf))
                .collect(),
            pool: BufferPool::new(self.cfg.pool_entries, self.cfg.entry_size),
            remote_reads: 0,
            processed_requests: 0,
        }
    }

    /// Run one scoped thread per worker: `thread_init`, then `body`, then
    /// `cleanup`. Returns once every worker has terminated.
    pub fn run_workers<F>(self: &Arc<Self>, body: F)
    where
        F: Fn(&mut CacheWorker) + Send + Sync,
    {
        crossbeam_utils::thread::scope(|s| {
            for id in 0..self.total_workers() {
                let ctx = self.clone();
                let body = &body;
                s.spawn(move |_| {
                    let mut worker = ctx.worker(id);
                    worker
                        .thread_init()
                        .expect("cache worker initialization failed");
                    body(&mut worker);
                    worker.cleanup();
                });
            }
        })
        .expect("cache worker panicked");
    }

    /// The members of `group` ordered by intra-group index.
    fn group_members(&self, group: usize) -> Vec<Arc<WorkerShared>> {
        self.workers
            .iter()
            .skip(group)
            .step_by(self.cfg.num_groups)
            .cloned()
            .collect()
    }
}

/// The thread-local state of one partitioned cache worker.
pub struct CacheWorker {
    shared: Arc<WorkerShared>,
    ctx: Arc<CacheContext>,
    cache: Option<Arc<BlockStore>>,
    /// Per-group staging for outgoing requests.
    pending_reqs: Vec<Vec<IoRequest>>,
    /// Per-worker staging for outgoing replies.
    pending_replies: Vec<Vec<IoReply>>,
    pool: BufferPool,
    remote_reads: u64,
    processed_requests: u64,
}

impl CacheWorker {
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    pub fn group(&self) -> usize {
        self.shared.group
    }

    fn intra_idx(&self) -> usize {
        self.shared.id / self.ctx.cfg.num_groups
    }

    /// Requests forwarded to a group other than this worker's own.
    pub fn remote_reads(&self) -> u64 {
        self.remote_reads
    }

    /// Requests this worker has executed on behalf of its peers.
    pub fn processed_requests(&self) -> u64 {
        self.processed_requests
    }

    /// Bind to this worker's node, create the group's shared store if this
    /// worker gets there first, and wait until every worker has done the
    /// same. No worker touches a queue before the barrier lifts.
    pub fn thread_init(&mut self) -> Result<(), LatticeError> {
        let cfg = &self.ctx.cfg;
        debug!(
            "worker {} is associated to node {}",
            self.shared.id, self.shared.group
        );
        if let Some(cores) = core_affinity::get_core_ids() {
            if !cores.is_empty() {
                let idx = self.shared.group * cfg.threads_per_group
                    + self.intra_idx();
                core_affinity::set_for_current(cores[idx % cores.len()]);
            }
        }

        let total = self.ctx.total_workers();
        let mut num_init = self.ctx.num_finish_init.lock();
        {
            // serialized by the init lock: exactly one worker per group
            // creates the store
            let mut cache =
                self.ctx.groups[self.shared.group].cache.lock();
            if cache.is_none() {
                let per_group = cfg.cache_bytes / cfg.num_groups;
                *cache = Some(Arc::new(BlockStore::open(
                    &self.ctx.backing,
                    per_group,
                )?));
                info!(
                    "worker {} created the cache for group {}",
                    self.shared.id, self.shared.group
                );
            }
            self.cache = cache.clone();
        }
        *num_init += 1;
        if *num_init == total {
            self.ctx.init_cond.notify_all();
        } else {
            while *num_init < total {
                self.ctx.init_cond.wait(&mut num_init);
            }
        }
        debug!("worker {} finishes initialization", self.shared.id);
        Ok(())
    }

    /// Take one I/O buffer from this worker's pool, or `None` while they
    /// are all in flight.
    pub fn alloc_buf(&mut self) -> Option<Vec<u8>> {
        self.pool.alloc()
    }

    /// Build a request against this worker, borrowing a pool buffer.
    pub fn make_request(
        &mut self,
        offset: u64,
        method: AccessMethod,
    ) -> Option<IoRequest> {
        let buf = self.pool.alloc()?;
        Some(IoRequest {
            offset,
            size: buf.len() as u32,
            method,
            buf,
            origin: self.shared.id,
        })
    }

    /// Try to hand `reqs` to any worker of `group`. The local worker's own
    /// intra-group slot is tried first for local traffic; remote traffic
    /// starts at a random member for load balancing. Whatever no peer had
    /// room for stays in `reqs`.
    fn send(&mut self, group: usize, reqs: &mut Vec<IoRequest>) {
        if group != self.shared.group {
            self.remote_reads += reqs.len() as u64;
        }
        let members = self.ctx.group_members(group);
        let base = if group == self.shared.group {
            self.intra_idx()
        } else {
            rand::thread_rng().gen_range(0..members.len())
        };
        for i in 0..members.len() {
            if reqs.is_empty() {
                break;
            }
            let peer = &members[(base + i) % members.len()];
            // is_full is a pre-check, it can't guarantee the queue
            // isn't full
            if !peer.request_q.is_full() {
                peer.request_q.add(reqs);
            }
        }
    }

    /// Hash every request to its owning group and stage it there, sending
    /// a bulk batch whenever a group's staging fills, then flush whatever
    /// is left. A request whose staging slot cannot take it is dropped
    /// with a log line.
    pub fn distribute_reqs(&mut self, reqs: Vec<IoRequest>) {
        let staging = self.ctx.cfg.staging_buf;
        for req in reqs {
            let group = self.hash_req(&req);
            if self.pending_reqs[group].len() == staging {
                error!(
                    "the request buffer for group {} is already full",
                    group
                );
                continue;
            }
            self.pending_reqs[group].push(req);
            if self.pending_reqs[group].len() == staging {
                self.flush_reqs(group);
            }
        }
        for group in 0..self.ctx.cfg.num_groups {
            if !self.pending_reqs[group].is_empty() {
                self.flush_reqs(group);
            }
        }
    }

    fn flush_reqs(&mut self, group: usize) {
        let mut batch = std::mem::take(&mut self.pending_reqs[group]);
        self.send(group, &mut batch);
        if !batch.is_empty() {
            debug!(
                "there are {} requests left for group {}",
                batch.len(),
                group
            );
        }
        self.pending_reqs[group] = batch;
    }

    fn hash_req(&self, req: &IoRequest) -> usize {
        ((req.offset / PAGE_SIZE as u64)
            % self.ctx.cfg.num_groups as u64) as usize
    }

    /// Route finished replies back to the workers whose requests produced
    /// them, through the same stage-then-bulk-push pattern as
    /// [`distribute_reqs`](Self::distribute_reqs).
    fn reply(&mut self, replies: Vec<(WorkerId, IoReply)>) {
        let staging = self.ctx.cfg.staging_buf;
        for (origin, rep) in replies {
            if self.pending_replies[origin].len() == staging {
                error!(
                    "the reply buffer for worker {} is already full",
                    origin
                );
                continue;
            }
            self.pending_replies[origin].push(rep);
            if self.pending_replies[origin].len() == staging {
                self.flush_replies(origin);
            }
        }
        for origin in 0..self.ctx.total_workers() {
            if !self.pending_replies[origin].is_empty() {
                self.flush_replies(origin);
            }
        }
    }

    fn flush_replies(&mut self, origin: WorkerId) {
        let mut batch = std::mem::take(&mut self.pending_replies[origin]);
        self.ctx.workers[origin].reply_q.add(&mut batch);
        if !batch.is_empty() {
            debug!(
                "there are {} replies left for worker {}",
                batch.len(),
                origin
            );
        }
        self.pending_replies[origin] = batch;
    }

    /// Execute up to `max` requests from this worker's own queue against
    /// the group store and route the replies out. Returns how many were
    /// processed.
    pub fn process_requests(&mut self, max: usize) -> usize {
        let staging = self.ctx.cfg.staging_buf;
        let cache = self
            .cache
            .clone()
            .expect("thread_init must run before processing");
        let mut processed = 0;
        let mut batch: Vec<IoRequest> = Vec::with_capacity(staging);
        while !self.shared.request_q.is_empty() && processed < max {
            let n = self.shared.request_q.fetch(&mut batch, staging);
            if n == 0 {
                break;
            }
            let mut out = Vec::with_capacity(n);
            for mut req in batch.drain(..) {
                let size = req.size as usize;
                let result =
                    cache.access(&mut req.buf[..size], req.offset, req.method);
                out.push(IoReply::for_request(req, result));
            }
            processed += n;
            self.reply(out);
        }
        self.processed_requests += processed as u64;
        processed
    }

    /// Drain up to `max` replies from this worker's own queue, returning
    /// their buffers to the pool. Returns how many replies were processed
    /// and how many payload bytes the successful ones carried.
    pub fn process_replies(&mut self, max: usize) -> (usize, usize) {
        let staging = self.ctx.cfg.staging_buf;
        let verify = self.ctx.cfg.verify_replies;
        let mut processed = 0;
        let mut bytes = 0;
        let mut batch: Vec<IoReply> = Vec::with_capacity(staging);
        while !self.shared.reply_q.is_empty() && processed < max {
            let n = self.shared.reply_q.fetch(&mut batch, staging);
            if n == 0 {
                break;
            }
            for rep in batch.drain(..) {
                if rep.success {
                    if verify && rep.method == AccessMethod::Read {
                        let word = u64::from_le_bytes(
                            rep.buf[..8].try_into().unwrap(),
                        );
                        assert_eq!(
                            word,
                            rep.offset / 8,
                            "reply payload does not match its offset"
                        );
                    }
                    bytes += rep.size as usize;
                } else {
                    error!(
                        "access error: {}",
                        io::Error::from_raw_os_error(rep.status)
                    );
                }
                self.pool.release(rep.buf);
            }
            processed += n;
        }
        (processed, bytes)
    }

    /// Issue a batch of requests and pump the queues until this worker's
    /// buffer pool has free entries again. Returns the payload bytes of
    /// the replies received while pumping; replies to these requests may
    /// arrive during later calls.
    pub fn access(
        &mut self,
        mut reqs: Vec<IoRequest>,
        method: AccessMethod,
    ) -> usize {
        let n = reqs.len().max(1);
        for req in &mut reqs {
            req.method = method;
            req.origin = self.shared.id;
        }
        self.distribute_reqs(reqs);
        // process more than was demanded to help the load imbalance
        // between workers
        let mut received = 0;
        self.process_requests(2 * n);
        received += self.process_replies(4 * n).1;
        while self.pool.exhausted() {
            self.process_requests(2 * n);
            received += self.process_replies(4 * n).1;
        }
        received
    }

    /// Announce termination to every worker, then keep draining both queues
    /// until they are empty and every worker has announced too.
    pub fn cleanup(&mut self) {
        debug!("worker {}: start to clean up", self.shared.id);
        for worker in &self.ctx.workers {
            worker.finished.fetch_add(1, Ordering::SeqCst);
        }
        let total = self.ctx.total_workers();
        while !self.shared.request_q.is_empty()
            || !self.shared.reply_q.is_empty()
            || self.shared.finished.load(Ordering::SeqCst) < total
        {
            self.process_requests(200);
            self.process_replies(200);
        }
        debug!(
            "worker {} processed {} requests",
            self.shared.id, self.processed_requests
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Backing file where the u64 at every 8-byte offset is `offset / 8`,
    /// the pattern `verify_replies` checks.
    fn probe_file(pages: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for word in 0..(pages * PAGE_SIZE / 8) as u64 {
            f.write_all(&word.to_le_bytes()).unwrap();
        }
        f.flush().unwrap();
        f
    }

    fn test_config(groups: usize, threads: usize) -> CacheConfig {
        CacheConfig {
            num_groups: groups,
            threads_per_group: threads,
            cache_bytes: 4 * 1024 * 1024,
            queue_cap: 128,
            staging_buf: 8,
            pool_entries: 64,
            entry_size: PAGE_SIZE,
            verify_replies: true,
        }
    }

    #[test]
    fn test_single_worker_round_trip() {
        let f = probe_file(16);
        let ctx = CacheContext::new(test_config(1, 1), f.path());
        let mut worker = ctx.worker(0);
        worker.thread_init().unwrap();

        let reqs: Vec<IoRequest> = (0..8)
            .map(|i| {
                worker
                    .make_request(i * PAGE_SIZE as u64, AccessMethod::Read)
                    .unwrap()
            })
            .collect();
        worker.access(reqs, AccessMethod::Read);
        worker.cleanup();
        assert_eq!(worker.processed_requests(), 8);
        assert_eq!(worker.remote_reads(), 0);
    }

    #[test]
    fn test_replies_route_back_to_origin() {
        let f = probe_file(64);
        let ctx = CacheContext::new(test_config(2, 2), f.path());
        ctx.run_workers(|worker| {
            let id = worker.id() as u64;
            let reqs: Vec<IoRequest> = (0..32)
                .map(|i| {
                    let offset = ((id * 32 + i) % 64) * PAGE_SIZE as u64;
                    worker
                        .make_request(offset, AccessMethod::Read)
                        .unwrap()
                })
                .collect();
            worker.access(reqs, AccessMethod::Read);
        });
        // run_workers returning means cleanup terminated on all four
        // workers with their queues drained; verify_replies checked every
        // reply against its offset along the way
    }

    #[test]
    fn test_termination_with_no_requests() {
        let f = probe_file(1);
        let ctx = CacheContext::new(test_config(2, 2), f.path());
        ctx.run_workers(|_| {});
    }
}
