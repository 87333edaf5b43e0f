//! Partitioned, globally cached block I/O.
//!
//! The cache is partitioned across NUMA groups; every group shares one
//! [`BlockStore`] and every worker owns a bounded request queue and reply
//! queue ([`BulkQueue`]). A worker hands a batch of [`IoRequest`]s to
//! [`CacheWorker::access`]; each request is hashed to its owning group,
//! staged per group, and bulk-pushed into some member's request queue. The
//! member executes the requests against its group's store and routes
//! [`IoReply`] records back through the origin worker's reply queue, where
//! the origin reclaims the buffers into its pool.
//!
//! Workers are symmetric: the same thread both issues requests and serves
//! its partition, alternating via [`CacheWorker::process_requests`] and
//! [`CacheWorker::process_replies`]. Termination is cooperative - every
//! worker bumps a counter on every peer when it enters
//! [`CacheWorker::cleanup`] and spins draining its queues until the counter
//! shows all workers got there.
mod queue;
pub use queue::BulkQueue;

mod request;
pub use request::{AccessMethod, BufferPool, IoReply, IoRequest, WorkerId};

mod store;
pub use store::BlockStore;

mod worker;
pub use worker::{CacheConfig, CacheContext, CacheWorker};
