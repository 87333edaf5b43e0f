//! Line sources: byte streams handing out successive buffers that are
//! aligned on line boundaries, so parse tasks never see half a line.
use crate::error::LatticeError;
use flate2::read::MultiGzDecoder;
use std::alloc::Layout;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::ptr::NonNull;

use crate::PAGE_SIZE;

/// An owned page-aligned byte buffer. Page alignment is required by the
/// direct-I/O read path; the gzip path uses it too so both sources hand out
/// the same buffer type.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// The buffer uniquely owns its allocation.
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    fn zeroed(len: usize) -> Self {
        assert!(len > 0);
        let layout =
            Layout::from_size_align(len, PAGE_SIZE).expect("bad buffer layout");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(ptr) {
            Some(p) => p,
            None => std::alloc::handle_alloc_error(layout),
        };
        AlignedBuf { ptr, len }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, PAGE_SIZE);
            std::alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlignedBuf({} bytes)", self.len)
    }
}

/// One read window's worth of complete lines: an owning buffer, the offset
/// the lines start at inside it, and their byte length. The byte one past
/// the last line is a zero sentinel. The last byte of the slice is `'\n'`
/// unless this is the end of a file that does not end with a newline.
#[derive(Debug)]
pub struct Block {
    buf: AlignedBuf,
    start: usize,
    len: usize,
}

impl Block {
    /// The complete-line bytes of this block, without the sentinel.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A byte stream that can be consumed block-by-block on line boundaries.
/// Once `eof` reports true, `read_block` must not be called again.
pub trait LineSource: Send {
    /// Read roughly `wanted` bytes' worth of complete lines. The returned
    /// block may be smaller (end of file, or lines not dividing evenly) but
    /// always ends on a line boundary as described on [`Block`].
    fn read_block(&mut self, wanted: usize) -> Result<Block, LatticeError>;

    /// True when the stream has been fully consumed.
    fn eof(&self) -> bool;
}

/// Opens the right [`LineSource`] for `file`: names ending in `.gz` are
/// gzip-decoded, everything else is read as plain text.
pub fn open_source(file: &Path) -> Result<Box<dyn LineSource>, LatticeError> {
    if file.extension().map_or(false, |e| e == "gz") {
        Ok(Box::new(GzFileSource::open(file)?))
    } else {
        Ok(Box::new(TextFileSource::open(file)?))
    }
}

fn round_down_page(off: u64) -> u64 {
    off & !(PAGE_SIZE as u64 - 1)
}

fn round_up_page(off: u64) -> u64 {
    round_down_page(off + PAGE_SIZE as u64 - 1)
}

/// Plain-text source reading aligned windows with direct I/O where the
/// platform offers it.
struct TextFileSource {
    file: File,
    curr_off: u64,
    file_size: u64,
}

#[cfg(target_os = "linux")]
fn open_data_file(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    // tmpfs and some network filesystems reject O_DIRECT; fall back to a
    // buffered descriptor, the aligned windowing stays the same either way
    match File::options()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
    {
        Ok(f) => Ok(f),
        Err(_) => File::open(path),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_data_file(path: &Path) -> io::Result<File> {
    File::open(path)
}

impl TextFileSource {
    fn open(path: &Path) -> Result<Self, LatticeError> {
        let file = open_data_file(path)?;
        let file_size = file.metadata()?.len();
        Ok(TextFileSource {
            file,
            curr_off: 0,
            file_size,
        })
    }
}

fn read_window(file: &mut File, buf: &mut [u8], expected: usize) -> io::Result<()> {
    // Read lengths stay aligned until the final short read at end of file,
    // which keeps O_DIRECT happy.
    let mut filled = 0;
    while filled < expected {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being read",
            ));
        }
        filled += n;
    }
    Ok(())
}

impl LineSource for TextFileSource {
    fn read_block(&mut self, wanted: usize) -> Result<Block, LatticeError> {
        debug_assert!(!self.eof());
        let align_start = round_down_page(self.curr_off);
        let align_end = round_up_page(self.curr_off + wanted as u64);
        let buf_size = (align_end - align_start) as usize;
        // one byte past the aligned read region keeps room for the
        // sentinel even when the window fills completely
        let mut buf = AlignedBuf::zeroed(buf_size + 1);

        let expected =
            buf_size.min((self.file_size - align_start) as usize);
        self.file.seek(SeekFrom::Start(align_start))?;
        read_window(&mut self.file, &mut buf[..buf_size], expected)?;

        let local_off = (self.curr_off - align_start) as usize;
        if local_off > 0 {
            debug_assert_eq!(buf[local_off - 1], b'\n');
        }

        // Find the end of the last line in the window.
        let mut pos = expected - 1;
        let line_end = loop {
            if buf[pos] == b'\n' {
                break pos + 1;
            }
            if pos == local_off {
                if align_start + expected as u64 == self.file_size {
                    // final line of the file without a trailing newline
                    break expected;
                }
                return Err(LatticeError::LineTooLong);
            }
            pos -= 1;
        };
        buf[line_end] = 0;

        let consumed = line_end - local_off;
        self.curr_off += consumed as u64;
        debug_assert!(self.curr_off <= self.file_size);
        Ok(Block {
            buf,
            start: local_off,
            len: consumed,
        })
    }

    fn eof(&self) -> bool {
        self.curr_off == self.file_size
    }
}

/// Gzip source. Decoding cannot seek, so bytes decoded past the requested
/// window are kept in a small carry buffer and prepended to the next block.
struct GzFileSource {
    decoder: MultiGzDecoder<File>,
    carry: Vec<u8>,
    done: bool,
}

impl GzFileSource {
    fn open(path: &Path) -> Result<Self, LatticeError> {
        let file = File::open(path)?;
        Ok(GzFileSource {
            decoder: MultiGzDecoder::new(file),
            carry: Vec::new(),
            done: false,
        })
    }
}

impl LineSource for GzFileSource {
    fn read_block(&mut self, wanted: usize) -> Result<Block, LatticeError> {
        debug_assert!(!self.eof());
        let buf_size = wanted.max(self.carry.len()) + PAGE_SIZE + 1;
        let mut buf = AlignedBuf::zeroed(buf_size);

        let mut filled = 0;
        if !self.carry.is_empty() {
            buf[..self.carry.len()].copy_from_slice(&self.carry);
            filled = self.carry.len();
            self.carry.clear();
        }

        // Decode up to a page beyond the window so the block can be closed
        // on the newline following it.
        let goal = filled + wanted.saturating_sub(filled);
        let cap = goal + PAGE_SIZE;
        while filled < cap && !self.done {
            match self.decoder.read(&mut buf[filled..cap]) {
                Ok(0) => self.done = true,
                Ok(n) => filled += n,
                // surfaced like any other read failure; what it kills
                // depends on which thread is reading
                Err(e) => return Err(e.into()),
            }
        }

        let line_end = if filled > goal {
            match buf[goal..filled].iter().position(|&b| b == b'\n') {
                Some(i) => goal + i + 1,
                None => {
                    // no newline within a page of the window end; close the
                    // block at the last newline before it instead
                    match buf[..goal].iter().rposition(|&b| b == b'\n') {
                        Some(j) => j + 1,
                        None => return Err(LatticeError::LineTooLong),
                    }
                }
            }
        } else {
            // decoder drained; everything left is the final block
            filled
        };
        self.carry.extend_from_slice(&buf[line_end..filled]);
        buf[line_end] = 0;

        Ok(Block {
            buf,
            start: 0,
            len: line_end,
        })
    }

    fn eof(&self) -> bool {
        self.done && self.carry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn temp_file_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    fn drain(source: &mut dyn LineSource, wanted: usize) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        while !source.eof() {
            let block = source.read_block(wanted).unwrap();
            blocks.push(block.bytes().to_vec());
        }
        blocks
    }

    #[test]
    fn test_text_blocks_end_on_newlines() {
        let content: Vec<u8> = (0..2000)
            .map(|i| format!("{} {}\n", i, i + 1))
            .collect::<String>()
            .into_bytes();
        let f = temp_file_with(&content);
        let mut src = TextFileSource::open(f.path()).unwrap();
        let blocks = drain(&mut src, 512);
        assert!(blocks.len() > 1);
        for b in &blocks {
            assert_eq!(*b.last().unwrap(), b'\n');
        }
        let joined: Vec<u8> = blocks.concat();
        assert_eq!(joined, content);
    }

    #[test]
    fn test_text_no_trailing_newline() {
        let content = b"1 2\n3 4".to_vec();
        let f = temp_file_with(&content);
        let mut src = TextFileSource::open(f.path()).unwrap();
        let blocks = drain(&mut src, 1 << 20);
        assert_eq!(blocks.concat(), content);
        assert!(src.eof());
    }

    #[test]
    fn test_text_page_aligned_end_without_newline() {
        // file size lands exactly on the aligned window size: one full
        // page ending in '\n', then one full page with no newline at all
        let mut content = vec![b'a'; PAGE_SIZE - 1];
        content.push(b'\n');
        content.extend(vec![b'b'; PAGE_SIZE]);
        let f = temp_file_with(&content);
        let mut src = TextFileSource::open(f.path()).unwrap();
        let blocks = drain(&mut src, PAGE_SIZE);
        assert_eq!(blocks.len(), 2);
        // the newline sits on the last byte of a completely full window
        assert_eq!(*blocks[0].last().unwrap(), b'\n');
        // the second window is full, reaches end of file and holds a
        // single unterminated line
        assert_eq!(blocks[1], vec![b'b'; PAGE_SIZE]);
        assert_eq!(blocks.concat(), content);
        assert!(src.eof());
    }

    #[test]
    fn test_text_empty_file() {
        let f = temp_file_with(b"");
        let src = TextFileSource::open(f.path()).unwrap();
        assert!(src.eof());
    }

    #[test]
    fn test_text_open_missing_file() {
        assert!(TextFileSource::open(Path::new("/no/such/file")).is_err());
    }

    #[test]
    fn test_gzip_carry_over() {
        let content: Vec<u8> = (0..5000)
            .map(|i| format!("{} {}\n", i, i * 2))
            .collect::<String>()
            .into_bytes();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&content).unwrap();
        let gz = enc.finish().unwrap();
        let f = temp_file_with(&gz);

        let mut src = GzFileSource::open(f.path()).unwrap();
        let blocks = drain(&mut src, 1024);
        assert!(blocks.len() > 1);
        for b in blocks.iter().filter(|b| !b.is_empty()) {
            assert_eq!(*b.last().unwrap(), b'\n');
        }
        assert_eq!(blocks.concat(), content);
    }

    #[test]
    fn test_open_source_dispatch() {
        let f = temp_file_with(b"1 2\n");
        let mut src = open_source(f.path()).unwrap();
        let block = src.read_block(64).unwrap();
        assert_eq!(block.bytes(), b"1 2\n");
        assert!(src.eof());
    }
}
