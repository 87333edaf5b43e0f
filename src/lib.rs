//! # lattice
//!
//! The core of a parallel matrix/graph analytics engine. Two subsystems do
//! the heavy lifting:
//!
//! - [`ingest`] streams edge-list files (plain text or gzip) block by
//!   block, parses the blocks concurrently on a NUMA-aware [`pool`], and
//!   merges the per-block results into one [`dataframe::DataFrame`] of
//!   typed columns. See [`ingest::read_edge_list`] for the usual entry
//!   point.
//! - [`cache`] is a per-NUMA-group sharded page cache where symmetric
//!   workers forward hashed block requests to the owning partition over
//!   bounded queues and route the replies back to the issuer.
//!
//! Everything is plain OS threads and lock-based queues; there is no async
//! runtime, no global state, and failures follow a simple rule: malformed
//! input lines are logged and skipped, unopenable files surface an error
//! before any work starts, and a torn read or failed decompression kills
//! the job.
pub mod cache;
pub mod dataframe;
pub mod error;
pub mod ingest;
pub mod pool;
pub mod types;

pub use error::LatticeError;

/// The page size used for aligned reads and cache blocks.
pub(crate) const PAGE_SIZE: usize = 4096;
