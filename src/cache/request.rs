//! The records moved between partitioned cache workers, and the per-worker
//! pool of I/O buffers they travel in.
use std::io;

/// Identifies a partitioned cache worker; also the routing key replies are
/// sent back with.
pub type WorkerId = usize;

/// Whether a request reads from or writes to the cached store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessMethod {
    Read,
    Write,
}

/// One block I/O request. The buffer is owned by the request while it is in
/// flight and comes back attached to the reply.
#[derive(Debug)]
pub struct IoRequest {
    pub offset: u64,
    pub size: u32,
    pub method: AccessMethod,
    pub buf: Vec<u8>,
    /// The worker that issued this request; its reply is routed back here.
    pub origin: WorkerId,
}

/// The outcome of one request, carrying the request's buffer back to its
/// origin. After delivery the buffer belongs to the recipient, which
/// returns it to its pool.
#[derive(Debug)]
pub struct IoReply {
    pub offset: u64,
    pub size: u32,
    pub method: AccessMethod,
    pub buf: Vec<u8>,
    /// OS error code when `success` is false, 0 otherwise.
    pub status: i32,
    pub success: bool,
}

impl IoReply {
    /// Build the reply for a completed request, keeping the origin alongside
    /// so the sender can route it.
    pub(crate) fn for_request(
        req: IoRequest,
        result: io::Result<usize>,
    ) -> (WorkerId, IoReply) {
        let status = match &result {
            Ok(_) => 0,
            Err(e) => e.raw_os_error().unwrap_or(-1),
        };
        (
            req.origin,
            IoReply {
                offset: req.offset,
                size: req.size,
                method: req.method,
                buf: req.buf,
                status,
                success: result.is_ok(),
            },
        )
    }
}

/// A fixed set of equally sized I/O buffers owned by one worker. Requests
/// borrow a buffer on the way out; processing the reply hands it back. The
/// worker keeps pumping its queues while the pool is exhausted, which is
/// what bounds the number of requests it can have in flight.
pub struct BufferPool {
    free: Vec<Vec<u8>>,
    entry_size: usize,
    total: usize,
}

impl BufferPool {
    pub fn new(entries: usize, entry_size: usize) -> Self {
        BufferPool {
            free: (0..entries).map(|_| vec![0u8; entry_size]).collect(),
            entry_size,
            total: entries,
        }
    }

    /// Take a buffer, or `None` when every buffer is in flight.
    pub fn alloc(&mut self) -> Option<Vec<u8>> {
        self.free.pop()
    }

    /// Return a buffer delivered by a reply.
    pub fn release(&mut self, mut buf: Vec<u8>) {
        debug_assert!(self.free.len() < self.total);
        buf.resize(self.entry_size, 0);
        self.free.push(buf);
    }

    /// True while every buffer is checked out.
    pub fn exhausted(&self) -> bool {
        self.free.is_empty()
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_release() {
        let mut pool = BufferPool::new(2, 8);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.exhausted());
        assert!(pool.alloc().is_none());
        pool.release(a);
        assert!(!pool.exhausted());
        pool.release(b);
        assert_eq!(pool.alloc().unwrap().len(), 8);
    }

    #[test]
    fn test_reply_keeps_origin_and_status() {
        let req = IoRequest {
            offset: 4096,
            size: 8,
            method: AccessMethod::Read,
            buf: vec![0u8; 8],
            origin: 3,
        };
        let (origin, reply) = IoReply::for_request(req, Ok(8));
        assert_eq!(origin, 3);
        assert!(reply.success);
        assert_eq!(reply.status, 0);

        let req = IoRequest {
            offset: 0,
            size: 8,
            method: AccessMethod::Read,
            buf: vec![0u8; 8],
            origin: 1,
        };
        let err = io::Error::from_raw_os_error(5);
        let (_, reply) = IoReply::for_request(req, Err(err));
        assert!(!reply.success);
        assert_eq!(reply.status, 5);
    }
}
