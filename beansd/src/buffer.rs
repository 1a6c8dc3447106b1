//! Per-connection read buffer.
//!
//! A growable contiguous buffer with a consume cursor. Unread bytes are
//! compacted to the front before each network fill; capacity doubles when a
//! fill saturates it and is clamped by a hard cap so a hostile client cannot
//! grow it without bound. The shrink policy runs on every transition back to
//! the read state (see `Connection::set_state`).

use std::io::{self, Read};

/// How a network fill ended.
#[derive(Debug)]
pub enum FillStatus {
    /// At least one byte arrived.
    Got,
    /// Nothing available; suspend on readable.
    Empty,
    /// Peer closed the stream.
    Eof,
    /// The buffer hit its hard cap with no complete command.
    TooLarge,
    /// Hard socket error.
    Error(io::Error),
}

pub struct ReadBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
    init_size: usize,
    max_size: usize,
}

impl ReadBuffer {
    pub fn new(init_size: usize, max_size: usize) -> Self {
        Self {
            buf: vec![0; init_size],
            start: 0,
            end: 0,
            init_size,
            max_size,
        }
    }

    /// The unconsumed bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drop `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start += n.min(self.len());
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Copy up to `dst.len()` bytes out of the front, consuming them.
    pub fn take_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.consume(n);
        n
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.buf.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Read from the socket until it would block, doubling capacity whenever
    /// a read saturates it. Returns the bytes read this call and how the
    /// fill ended; the byte count is valid for every status.
    pub fn fill_from<R: Read>(&mut self, r: &mut R) -> (usize, FillStatus) {
        self.compact();
        let mut total = 0;

        loop {
            if self.end == self.buf.len() {
                if self.buf.len() >= self.max_size {
                    // Discard the request; the caller replies and closes.
                    self.start = 0;
                    self.end = 0;
                    return (total, FillStatus::TooLarge);
                }
                let new_size = (self.buf.len() * 2).min(self.max_size);
                self.buf.resize(new_size, 0);
            }

            let avail = self.buf.len() - self.end;
            match r.read(&mut self.buf[self.end..]) {
                Ok(0) => return (total, FillStatus::Eof),
                Ok(n) => {
                    total += n;
                    self.end += n;
                    if n == avail {
                        continue;
                    }
                    return (total, FillStatus::Got);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let status = if total > 0 {
                        FillStatus::Got
                    } else {
                        FillStatus::Empty
                    };
                    return (total, status);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return (total, FillStatus::Error(e)),
            }
        }
    }

    /// Shrink back to the initial size when capacity outgrew `highwat` and
    /// the current fill is modest. Best-effort; contents are preserved.
    pub fn shrink(&mut self, highwat: usize, fill_limit: usize) {
        if self.capacity() > highwat && self.len() < fill_limit {
            self.compact();
            self.buf.truncate(self.init_size);
            self.buf.shrink_to(self.init_size);
        }
    }

    /// Recycling reset: drop contents, keep the allocation.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds scripted chunks, then WouldBlock.
    struct Script {
        chunks: Vec<Vec<u8>>,
    }

    impl Read for Script {
        fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            match self.chunks.first_mut() {
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Some(chunk) => {
                    let n = dst.len().min(chunk.len());
                    dst[..n].copy_from_slice(&chunk[..n]);
                    chunk.drain(..n);
                    if chunk.is_empty() {
                        self.chunks.remove(0);
                    }
                    Ok(n)
                }
            }
        }
    }

    #[test]
    fn fill_and_consume() {
        let mut rb = ReadBuffer::new(16, 1024);
        let mut src = Script {
            chunks: vec![b"hello world".to_vec()],
        };
        let (n, status) = rb.fill_from(&mut src);
        assert_eq!(n, 11);
        assert!(matches!(status, FillStatus::Got));
        assert_eq!(rb.data(), b"hello world");

        rb.consume(6);
        assert_eq!(rb.data(), b"world");
    }

    #[test]
    fn grows_by_doubling() {
        let mut rb = ReadBuffer::new(4, 1024);
        let mut src = Script {
            chunks: vec![vec![b'x'; 100]],
        };
        let (n, _) = rb.fill_from(&mut src);
        assert_eq!(n, 100);
        assert_eq!(rb.len(), 100);
        assert!(rb.capacity() >= 100);
    }

    #[test]
    fn hard_cap_discards() {
        let mut rb = ReadBuffer::new(4, 16);
        let mut src = Script {
            chunks: vec![vec![b'x'; 64]],
        };
        let (_, status) = rb.fill_from(&mut src);
        assert!(matches!(status, FillStatus::TooLarge));
        assert!(rb.is_empty());
    }

    #[test]
    fn eof_reported() {
        let mut rb = ReadBuffer::new(16, 64);
        // Empty script: read returns WouldBlock, not EOF...
        struct Eof;
        impl Read for Eof {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let (n, status) = rb.fill_from(&mut Eof);
        assert_eq!(n, 0);
        assert!(matches!(status, FillStatus::Eof));
    }

    #[test]
    fn take_into_copies_and_consumes() {
        let mut rb = ReadBuffer::new(16, 64);
        let mut src = Script {
            chunks: vec![b"abcdef".to_vec()],
        };
        rb.fill_from(&mut src);

        let mut dst = [0u8; 4];
        assert_eq!(rb.take_into(&mut dst), 4);
        assert_eq!(&dst, b"abcd");
        assert_eq!(rb.data(), b"ef");
    }

    #[test]
    fn shrink_respects_fill() {
        let mut rb = ReadBuffer::new(8, 1024);
        let mut src = Script {
            chunks: vec![vec![b'y'; 200]],
        };
        rb.fill_from(&mut src);
        let grown = rb.capacity();
        assert!(grown > 8);

        // Too full to shrink.
        rb.shrink(64, 16);
        assert_eq!(rb.capacity(), grown);

        rb.consume(198);
        rb.shrink(64, 16);
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.data(), b"yy");
    }
}
