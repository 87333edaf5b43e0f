//! A module for creating and manipulating data frames. A data frame here is
//! the unit the ingestion pipeline produces: a schema-preserving ordered set
//! of named typed columns supporting bulk append.
//!
//! The design splits storage into two layers:
//!
//! # [`Column`]
//!
//! A memory-resident typed vector. Parse tasks stage their output into plain
//! `Column`s sized to the block they consume, then move them into a frame in
//! one append per column.
//!
//! # [`TieredColumn`]
//!
//! The store a [`DataFrame`] actually holds. Constructed memory-resident it
//! behaves like a `Column`; constructed with `in_mem = false` it flushes its
//! in-memory tier to an anonymous temp file once it outgrows a threshold, so
//! result frames larger than memory can still be assembled. Reads of flushed
//! elements go back through the spill file.
//!
//! Frames built by concurrent parse tasks are merged with
//! [`DataFrame::append`], which concatenates matching-schema frames column
//! by column. Input-line order across blocks is not preserved by the
//! ingestion driver, so consumers needing a total order must sort.
mod column;
pub use column::{Column, TieredColumn, DEFAULT_SPILL_THRESHOLD};

mod frame;
pub use frame::DataFrame;
pub(crate) use frame::empty_frame_like;

mod schema;
pub use schema::Schema;
