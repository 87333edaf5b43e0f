//! The page store each NUMA group shares: a backing file fronted by an LRU
//! page cache.
use crate::cache::request::AccessMethod;
use crate::error::LatticeError;
use crate::PAGE_SIZE;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// A file-backed block store with an in-memory page cache. One instance is
/// created per NUMA group and shared by every worker in the group; the
/// internal lock is the only synchronization it needs.
pub struct BlockStore {
    file: File,
    pages: Mutex<LruCache<u64, Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockStore {
    /// Open `path` as the backing file, caching up to `cache_bytes` worth
    /// of pages.
    pub fn open(path: &Path, cache_bytes: usize) -> Result<Self, LatticeError> {
        let file = File::options().read(true).write(true).open(path)?;
        let pages = (cache_bytes / PAGE_SIZE).max(1);
        debug!(
            "opened block store on {} with a {}-page cache",
            path.display(),
            pages
        );
        Ok(BlockStore {
            file,
            pages: Mutex::new(LruCache::new(
                NonZeroUsize::new(pages).unwrap(),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Read or write `buf.len()` bytes at `offset` through the page cache.
    /// Returns the byte count on success; errors carry the OS status the
    /// reply will report.
    pub fn access(
        &self,
        buf: &mut [u8],
        offset: u64,
        method: AccessMethod,
    ) -> io::Result<usize> {
        match method {
            AccessMethod::Read => self.read(buf, offset),
            AccessMethod::Write => self.write(buf, offset),
        }
    }

    /// Cache hit/miss counters, mostly for diagnostics.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let off = offset + done as u64;
            let page_off = off & !(PAGE_SIZE as u64 - 1);
            let in_page = (off - page_off) as usize;
            let n = (PAGE_SIZE - in_page).min(buf.len() - done);

            let cached = {
                let mut pages = self.pages.lock();
                pages.get(&page_off).map(|p| {
                    buf[done..done + n]
                        .copy_from_slice(&p[in_page..in_page + n]);
                })
            };
            if cached.is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let page = self.read_page(page_off)?;
                buf[done..done + n]
                    .copy_from_slice(&page[in_page..in_page + n]);
                self.pages.lock().put(page_off, page);
            }
            done += n;
        }
        Ok(done)
    }

    fn write(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        // write-through: the file is updated first, then any cached pages
        // covering the range are patched in place
        self.file.write_all_at(buf, offset)?;
        let mut done = 0;
        while done < buf.len() {
            let off = offset + done as u64;
            let page_off = off & !(PAGE_SIZE as u64 - 1);
            let in_page = (off - page_off) as usize;
            let n = (PAGE_SIZE - in_page).min(buf.len() - done);
            let mut pages = self.pages.lock();
            if let Some(page) = pages.get_mut(&page_off) {
                page[in_page..in_page + n]
                    .copy_from_slice(&buf[done..done + n]);
            }
            done += n;
        }
        Ok(buf.len())
    }

    /// Read one full page, zero-filling whatever lies past end of file.
    fn read_page(&self, page_off: u64) -> io::Result<Vec<u8>> {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = self
                .file
                .read_at(&mut page[filled..], page_off + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backing_file(len: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_read_through_and_hit() {
        let f = backing_file(4 * PAGE_SIZE);
        let store = BlockStore::open(f.path(), 2 * PAGE_SIZE).unwrap();
        let mut buf = vec![0u8; 16];
        store
            .access(&mut buf, 100, AccessMethod::Read)
            .unwrap();
        let expect: Vec<u8> = (100..116).map(|i| (i % 251) as u8).collect();
        assert_eq!(buf, expect);
        let (hits, misses) = store.stats();
        assert_eq!((hits, misses), (0, 1));

        // same page again: served from cache
        store.access(&mut buf, 200, AccessMethod::Read).unwrap();
        assert_eq!(store.stats().0, 1);
    }

    #[test]
    fn test_read_spanning_pages() {
        let f = backing_file(4 * PAGE_SIZE);
        let store = BlockStore::open(f.path(), 8 * PAGE_SIZE).unwrap();
        let start = PAGE_SIZE as u64 - 8;
        let mut buf = vec![0u8; 16];
        store.access(&mut buf, start, AccessMethod::Read).unwrap();
        let expect: Vec<u8> = (0..16)
            .map(|i| ((start as usize + i) % 251) as u8)
            .collect();
        assert_eq!(buf, expect);
    }

    #[test]
    fn test_write_through_updates_cache() {
        let f = backing_file(2 * PAGE_SIZE);
        let store = BlockStore::open(f.path(), 4 * PAGE_SIZE).unwrap();
        let mut buf = vec![0u8; 8];
        store.access(&mut buf, 64, AccessMethod::Read).unwrap();

        let mut patch = vec![0xAB; 8];
        store.access(&mut patch, 64, AccessMethod::Write).unwrap();

        // cached page must show the new bytes
        store.access(&mut buf, 64, AccessMethod::Read).unwrap();
        assert_eq!(buf, vec![0xAB; 8]);

        // and so must the file itself
        let raw = std::fs::read(f.path()).unwrap();
        assert_eq!(&raw[64..72], &[0xAB; 8]);
    }
}
