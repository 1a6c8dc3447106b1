//! Connection freelist.
//!
//! Closed connections return their buffer bundle here so the next accept
//! skips five allocations. The list is LIFO (the hottest buffers come back
//! first), starts at 200 slots, and doubles when an insert would overflow.
//! A bundle whose read buffer outgrew the high-watermark is dropped instead
//! of recycled, so one pathological client cannot pin memory forever.

use std::sync::{Arc, Mutex};

use crate::buffer::ReadBuffer;
use crate::conn::{DATA_BUFFER_SIZE, ITEM_LIST_INITIAL, READ_BUFFER_HIGHWAT};
use crate::reply::{ReplyPlan, SEG_LIST_INITIAL};
use crate::store::Item;

const FREELIST_INITIAL: usize = 200;

/// The reusable allocations of one connection.
pub struct ConnBuffers {
    pub rbuf: ReadBuffer,
    /// Single-line reply scratch.
    pub wbuf: Vec<u8>,
    /// Items held alive while a get reply drains.
    pub ilist: Vec<Arc<Item>>,
    pub plan: ReplyPlan,
    /// Current command line (also the access-log record).
    pub cmd: Vec<u8>,
}

impl ConnBuffers {
    fn new(max_read_buffer: usize) -> Self {
        Self {
            rbuf: ReadBuffer::new(DATA_BUFFER_SIZE, max_read_buffer),
            wbuf: vec![0; DATA_BUFFER_SIZE],
            ilist: Vec::with_capacity(ITEM_LIST_INITIAL),
            plan: ReplyPlan::new(),
            cmd: Vec::with_capacity(SEG_LIST_INITIAL),
        }
    }

    fn reset(&mut self) {
        self.rbuf.clear();
        self.ilist.clear();
        self.plan.reset();
        self.cmd.clear();
    }
}

pub struct ConnPool {
    free: Mutex<Vec<ConnBuffers>>,
    max_read_buffer: usize,
}

impl ConnPool {
    pub fn new(max_read_buffer: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(FREELIST_INITIAL)),
            max_read_buffer,
        }
    }

    /// Pop a recycled bundle or allocate a fresh one. The flag reports a
    /// fresh allocation so the caller can count `connection_structures`.
    pub fn take(&self) -> (ConnBuffers, bool) {
        let recycled = {
            let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        };
        match recycled {
            Some(mut b) => {
                b.reset();
                (b, false)
            }
            None => (ConnBuffers::new(self.max_read_buffer), true),
        }
    }

    /// Return a bundle for reuse; oversized read buffers are destroyed.
    pub fn put(&self, bufs: ConnBuffers) {
        if bufs.rbuf.capacity() > READ_BUFFER_HIGHWAT {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() == free.capacity() {
            let additional = free.capacity().max(FREELIST_INITIAL);
            free.reserve(additional);
        }
        free.push(bufs);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FillStatus;
    use std::io::{self, Read};

    #[test]
    fn take_reports_fresh_then_reuses() {
        let pool = ConnPool::new(1024 * 1024);
        let (a, fresh_a) = pool.take();
        assert!(fresh_a);
        pool.put(a);
        assert_eq!(pool.len(), 1);

        let (_, fresh_b) = pool.take();
        assert!(!fresh_b);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn oversized_read_buffer_is_not_recycled() {
        struct Blast(usize);
        impl Read for Blast {
            fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::from(io::ErrorKind::WouldBlock));
                }
                let n = dst.len().min(self.0);
                self.0 -= n;
                Ok(n)
            }
        }

        let pool = ConnPool::new(1024 * 1024);
        let (mut b, _) = pool.take();
        let (_, status) = b.rbuf.fill_from(&mut Blast(READ_BUFFER_HIGHWAT * 2));
        assert!(matches!(status, FillStatus::Got));
        assert!(b.rbuf.capacity() > READ_BUFFER_HIGHWAT);

        pool.put(b);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn recycled_bundle_is_clean() {
        let pool = ConnPool::new(1024 * 1024);
        let (mut b, _) = pool.take();
        b.cmd.extend_from_slice(b"stale");
        b.ilist.push(Arc::new(Item::new(b"k", 0, 1, b"v")));
        pool.put(b);

        let (b, _) = pool.take();
        assert!(b.cmd.is_empty());
        assert!(b.ilist.is_empty());
        assert!(b.rbuf.is_empty());
    }
}
