//! The parallel edge-list ingestion pipeline.
//!
//! A [`LineSource`] streams a text (optionally gzip-compressed) file as
//! successive [`Block`]s that always end on a line boundary. The driver
//! turns each block into a parse task on the shared [`WorkerPool`]; each
//! task runs a [`LineParser`] over its block, building a small throwaway
//! [`DataFrame`], and pushes it into a bounded [`FrameQueue`]. The driver
//! drains the queue and appends everything into the result frame.
//!
//! Backpressure works in both directions: the driver stops reading blocks
//! when the pool has `workers * 3` tasks pending, and parse workers block
//! on the queue when the driver falls behind, which in turn stalls the
//! pool and therefore the driver. Neither side can deadlock because both
//! queue operations wake their counterpart before suspending.
//!
//! [`WorkerPool`]: crate::pool::WorkerPool
//! [`DataFrame`]: crate::dataframe::DataFrame
mod driver;
pub use driver::{read_edge_list, read_lines, read_lines_many, LINE_BLOCK_SIZE};

mod parser;
pub use parser::{
    split_lines, AttrEdgeParser, EdgeAttr, EdgeParser, LineParser, VertexId,
    MAX_VERTEX_ID,
};

mod queue;
pub use queue::FrameQueue;

mod source;
pub use source::{open_source, AlignedBuf, Block, LineSource};
