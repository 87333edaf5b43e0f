//! The ingestion driver: wires line sources, parse tasks on the worker pool
//! and the frame queue together into one result frame.
use crate::dataframe::{empty_frame_like, DataFrame};
use crate::error::LatticeError;
use crate::ingest::parser::{
    split_lines, AttrEdgeParser, EdgeParser, LineParser,
};
use crate::ingest::queue::FrameQueue;
use crate::ingest::source::{open_source, Block, LineSource};
use crate::pool::WorkerPool;
use crate::types::ElemType;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Target byte size of one parse block.
pub const LINE_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// How long the driver naps when the pool is saturated and the queue has
/// nothing to drain yet.
const DRAIN_POLL: Duration = Duration::from_micros(200);

fn frame_for_parser(
    parser: &dyn LineParser,
    in_mem: bool,
) -> Result<DataFrame, LatticeError> {
    let schema: Vec<(String, ElemType)> = (0..parser.num_cols())
        .map(|i| (parser.col_name(i).to_string(), parser.col_type(i)))
        .collect();
    empty_frame_like(&schema, in_mem)
}

/// One parse task: consumes exactly one block, pushes exactly one frame.
/// The driver's accounting relies on the push happening even when the whole
/// block is rejected.
fn parse_block(
    block: Block,
    parser: &Arc<dyn LineParser>,
    queue: &FrameQueue,
) {
    let mut df = frame_for_parser(parser.as_ref(), true)
        .expect("parser schemas are well formed");
    let lines = split_lines(&block);
    if let Err(e) = parser.parse(&lines, &mut df) {
        error!("parse task failed: {}", e);
    }
    queue.push(df);
}

fn file_parse_task(
    mut io: Box<dyn LineSource>,
    parser: Arc<dyn LineParser>,
    queue: Arc<FrameQueue>,
    name: String,
) {
    while !io.eof() {
        let block = match io.read_block(LINE_BLOCK_SIZE) {
            Ok(b) => b,
            Err(e) => {
                // a torn read inside a worker cannot be surfaced to the
                // driver, and the job is unrecoverable either way
                error!("fatal error reading {}: {}", name, e);
                std::process::exit(1);
            }
        };
        parse_block(block, &parser, &queue);
    }
}

/// Discard queued frames until no task is pending, so in-flight parse
/// tasks blocked on a full queue can finish before an error return drops
/// the queue.
fn drain_until_quiet(pool: &WorkerPool, queue: &FrameQueue) {
    while pool.pending() > 0 {
        if queue.count() > 0 {
            drop(queue.drain_all());
        } else {
            std::thread::sleep(DRAIN_POLL);
        }
    }
    if queue.count() > 0 {
        drop(queue.drain_all());
    }
}

/// Parse a single text (or gzip) file into a data frame with the parser's
/// schema. Blocks of the file are parsed concurrently on `pool`, so the
/// input-line order is not preserved in the result. `in_mem` controls
/// whether the result columns may spill to disk.
pub fn read_lines<P: AsRef<Path>>(
    file: P,
    parser: Arc<dyn LineParser>,
    in_mem: bool,
    pool: &WorkerPool,
) -> Result<DataFrame, LatticeError> {
    let mut result = frame_for_parser(parser.as_ref(), in_mem)?;
    let io = open_source(file.as_ref())?;
    info!("parsing {}", file.as_ref().display());

    let queue = Arc::new(FrameQueue::new(pool.num_workers() * 3));
    match single_file_loop(&mut result, io, &parser, &queue, pool) {
        Ok(()) => Ok(result),
        Err(e) => {
            drain_until_quiet(pool, &queue);
            Err(e)
        }
    }
}

fn single_file_loop(
    result: &mut DataFrame,
    mut io: Box<dyn LineSource>,
    parser: &Arc<dyn LineParser>,
    queue: &Arc<FrameQueue>,
    pool: &WorkerPool,
) -> Result<(), LatticeError> {
    let max_pending = pool.num_workers() * 3;
    while !io.eof() {
        let slots =
            max_pending.saturating_sub(pool.pending() as usize);
        for _ in 0..slots {
            if io.eof() {
                break;
            }
            let block = io.read_block(LINE_BLOCK_SIZE)?;
            let parser = parser.clone();
            let queue = queue.clone();
            pool.submit(None, move || parse_block(block, &parser, &queue));
        }
        if queue.count() > 0 {
            result.append(queue.drain_all())?;
        } else if slots == 0 {
            std::thread::sleep(DRAIN_POLL);
        }
    }
    pool.wait_for_quiescence();
    if queue.count() > 0 {
        result.append(queue.drain_all())?;
    }
    Ok(())
}

/// Parse many files into one data frame.
///
/// With a single file this delegates to [`read_lines`] and parallelizes at
/// block granularity. With two or more, each file becomes one pool task
/// that loops over its own blocks; that shape works better for many small
/// input files, and when the inputs are compressed it parallelizes
/// decompression too. The multiset of result rows is the same either way.
pub fn read_lines_many<P: AsRef<Path>>(
    files: &[P],
    parser: Arc<dyn LineParser>,
    in_mem: bool,
    pool: &WorkerPool,
) -> Result<DataFrame, LatticeError> {
    if files.len() == 1 {
        return read_lines(&files[0], parser, in_mem, pool);
    }
    let mut result = frame_for_parser(parser.as_ref(), in_mem)?;
    let queue = Arc::new(FrameQueue::new(pool.num_workers() * 3));
    match multi_file_loop(&mut result, files, &parser, &queue, pool) {
        Ok(()) => Ok(result),
        Err(e) => {
            drain_until_quiet(pool, &queue);
            Err(e)
        }
    }
}

fn multi_file_loop<P: AsRef<Path>>(
    result: &mut DataFrame,
    files: &[P],
    parser: &Arc<dyn LineParser>,
    queue: &Arc<FrameQueue>,
    pool: &WorkerPool,
) -> Result<(), LatticeError> {
    let max_pending = pool.num_workers() * 3;
    let mut remaining = files.iter();
    let mut next_file = remaining.next();
    while next_file.is_some() {
        let slots =
            max_pending.saturating_sub(pool.pending() as usize);
        for _ in 0..slots {
            let file = match next_file.take() {
                Some(f) => f,
                None => break,
            };
            next_file = remaining.next();
            // open failures surface here, before the file's task runs
            let io = open_source(file.as_ref())?;
            let parser = parser.clone();
            let queue = queue.clone();
            let name = file.as_ref().display().to_string();
            pool.submit(None, move || {
                file_parse_task(io, parser, queue, name)
            });
        }
        if queue.count() > 0 {
            result.append(queue.drain_all())?;
        } else if slots == 0 {
            std::thread::sleep(DRAIN_POLL);
        }
    }
    // keep draining until the last file task has finished, then collect
    // the tail frames
    while pool.pending() > 0 {
        if queue.count() > 0 {
            result.append(queue.drain_all())?;
        } else {
            std::thread::sleep(DRAIN_POLL);
        }
    }
    pool.wait_for_quiescence();
    if queue.count() > 0 {
        result.append(queue.drain_all())?;
    }
    Ok(())
}

/// Parse edge-list files into a frame of `source`/`dest` columns, plus an
/// `attr` column when `attr_type` names one: `"I"`/`"L"`/`"F"`/`"D"` for
/// 32/64-bit integer and 32/64-bit float attributes, `""` for none.
pub fn read_edge_list<P: AsRef<Path>>(
    files: &[P],
    in_mem: bool,
    attr_type: &str,
    pool: &WorkerPool,
) -> Result<DataFrame, LatticeError> {
    let parser: Arc<dyn LineParser> = match attr_type {
        "" => Arc::new(EdgeParser),
        "I" => Arc::new(AttrEdgeParser::<i32>::new()),
        "L" => Arc::new(AttrEdgeParser::<i64>::new()),
        "F" => Arc::new(AttrEdgeParser::<f32>::new()),
        "D" => Arc::new(AttrEdgeParser::<f64>::new()),
        other => {
            error!("unsupported edge attribute type {:?}", other);
            return Err(LatticeError::UnsupportedAttrType(
                other.to_string(),
            ));
        }
    };
    read_lines_many(files, parser, in_mem, pool)
}
