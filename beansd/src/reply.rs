//! Scatter/gather reply plan.
//!
//! Replies are described as segments over named sources — status-line
//! scratch, the stats heap buffer, held storage items — grouped into
//! messages. Segments store `(source, offset, len)` and are materialized as
//! `IoSlice`s at transmit time, so growing the lists never invalidates
//! anything (the classic msg_iov rebinding hazard does not exist here).
//!
//! The first message's payload is capped at [`MAX_PAYLOAD_SIZE`] bytes and a
//! fragment straddling the cap is split, a remnant of the legacy UDP framing
//! kept for byte-compatibility with clients that expect a modest first frame.

use std::io::{self, IoSlice, Write};
use std::sync::Arc;

use crate::store::Item;

/// Segments per message before a new message is started.
pub const IOV_MAX: usize = 1024;
/// Payload cap for the first message of a reply.
pub const MAX_PAYLOAD_SIZE: usize = 1400;

pub const SEG_LIST_INITIAL: usize = 400;
pub const SEG_LIST_HIGHWAT: usize = 600;
pub const MSG_LIST_INITIAL: usize = 10;
pub const MSG_LIST_HIGHWAT: usize = 100;

/// Where a segment's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegSource {
    /// A fixed protocol fragment (`"VALUE "`, `"END\r\n"`, …).
    Lit(&'static [u8]),
    /// The connection's single-line scratch buffer.
    WriteBuf,
    /// The connection's free-after-send heap buffer.
    HeapBuf,
    /// Key bytes of held item `i`.
    ItemKey(usize),
    /// Suffix + value + CRLF of held item `i`.
    ItemBody(usize),
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    src: SegSource,
    off: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Message {
    /// Index of the first undrained segment.
    start: usize,
    /// Undrained segments remaining.
    iovlen: usize,
    /// Total payload bytes queued into this message.
    bytes: usize,
}

/// Result of one [`ReplyPlan::transmit`] call.
#[derive(Debug)]
pub enum Transmit {
    /// All messages drained.
    Complete,
    /// Progress made (or an interrupted write); call again.
    Incomplete,
    /// The socket is full; re-arm writable and suspend.
    SoftError,
    /// Unrecoverable write failure; close the connection.
    HardError(io::Error),
}

/// Resolves segment sources to byte slices at transmit time.
pub struct Sources<'a> {
    pub write_buf: &'a [u8],
    pub heap_buf: &'a [u8],
    pub items: &'a [Arc<Item>],
}

impl Sources<'_> {
    fn resolve(&self, src: SegSource) -> &[u8] {
        match src {
            SegSource::Lit(bytes) => bytes,
            SegSource::WriteBuf => self.write_buf,
            SegSource::HeapBuf => self.heap_buf,
            SegSource::ItemKey(i) => self.items[i].key(),
            SegSource::ItemBody(i) => self.items[i].suffix_and_body(),
        }
    }
}

pub struct ReplyPlan {
    segs: Vec<Segment>,
    msgs: Vec<Message>,
    /// Message currently being drained.
    msgcurr: usize,
}

impl ReplyPlan {
    pub fn new() -> Self {
        Self {
            segs: Vec::with_capacity(SEG_LIST_INITIAL),
            msgs: Vec::with_capacity(MSG_LIST_INITIAL),
            msgcurr: 0,
        }
    }

    /// Start a fresh reply: empty lists and one open message.
    pub fn reset(&mut self) {
        self.segs.clear();
        self.msgs.clear();
        self.msgcurr = 0;
        self.add_msghdr();
    }

    /// No segments queued yet.
    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Rewind the drain cursor to the first message.
    pub fn rewind(&mut self) {
        self.msgcurr = 0;
    }

    fn add_msghdr(&mut self) {
        self.msgs.push(Message {
            start: self.segs.len(),
            iovlen: 0,
            bytes: 0,
        });
    }

    /// Queue `len` bytes of `src` (starting at offset 0) onto the plan.
    pub fn add_iov(&mut self, src: SegSource, len: usize) {
        self.add_iov_at(src, 0, len);
    }

    fn add_iov_at(&mut self, src: SegSource, mut off: usize, mut len: usize) {
        if self.msgs.is_empty() {
            self.add_msghdr();
        }
        loop {
            // Only the first message of a reply is size-capped.
            let limit_first = self.msgs.len() == 1;
            {
                let m = self.msgs.last().expect("reset() opens a message");
                if m.iovlen == IOV_MAX || (limit_first && m.bytes >= MAX_PAYLOAD_SIZE) {
                    self.add_msghdr();
                }
            }

            let limit_first = self.msgs.len() == 1;
            let m = self.msgs.last_mut().expect("reset() opens a message");
            let take = if limit_first && m.bytes + len > MAX_PAYLOAD_SIZE {
                MAX_PAYLOAD_SIZE - m.bytes
            } else {
                len
            };

            self.segs.push(Segment { src, off, len: take });
            m.bytes += take;
            m.iovlen += 1;

            off += take;
            len -= take;
            if len == 0 {
                return;
            }
        }
    }

    /// Drain the current message with one vectored write. Returns the bytes
    /// written this call (for the byte counters) and how the write ended.
    pub fn transmit<W: Write>(&mut self, w: &mut W, sources: &Sources<'_>) -> (usize, Transmit) {
        if self.msgcurr < self.msgs.len() && self.msgs[self.msgcurr].iovlen == 0 {
            // Finished the current message; advance to the next.
            self.msgcurr += 1;
        }
        if self.msgcurr >= self.msgs.len() {
            return (0, Transmit::Complete);
        }

        let m = self.msgs[self.msgcurr];
        let mut slices = Vec::with_capacity(m.iovlen);
        for seg in &self.segs[m.start..m.start + m.iovlen] {
            let bytes = sources.resolve(seg.src);
            slices.push(IoSlice::new(&bytes[seg.off..seg.off + seg.len]));
        }

        match w.write_vectored(&slices) {
            Ok(0) => (
                0,
                Transmit::HardError(io::Error::from(io::ErrorKind::WriteZero)),
            ),
            Ok(written) => {
                // Retire fully-sent segments, then adjust the partial one so
                // the next write resumes exactly where this one stopped.
                let mut n = written;
                let m = &mut self.msgs[self.msgcurr];
                while m.iovlen > 0 && n >= self.segs[m.start].len {
                    n -= self.segs[m.start].len;
                    m.start += 1;
                    m.iovlen -= 1;
                }
                if n > 0 {
                    let seg = &mut self.segs[m.start];
                    seg.off += n;
                    seg.len -= n;
                }
                (written, Transmit::Incomplete)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => (0, Transmit::SoftError),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => (0, Transmit::Incomplete),
            Err(e) => (0, Transmit::HardError(e)),
        }
    }

    /// Shrink the lists back to their initial capacities once they outgrow
    /// the high-watermarks. Only called between requests, when any queued
    /// reply has fully drained.
    pub fn shrink(&mut self) {
        if self.segs.capacity() > SEG_LIST_HIGHWAT {
            self.segs.clear();
            self.segs.shrink_to(SEG_LIST_INITIAL);
        }
        if self.msgs.capacity() > MSG_LIST_HIGHWAT {
            self.msgs.clear();
            self.msgs.shrink_to(MSG_LIST_INITIAL);
        }
    }
}

impl Default for ReplyPlan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_sources() -> Sources<'static> {
        Sources {
            write_buf: &[],
            heap_buf: &[],
            items: &[],
        }
    }

    fn lit(n: usize) -> &'static [u8] {
        Box::leak(vec![b'x'; n].into_boxed_slice())
    }

    /// Drain a plan through a writer that accepts at most `chunk` bytes per
    /// call; returns everything written.
    fn drain(plan: &mut ReplyPlan, sources: &Sources<'_>, chunk: usize) -> Vec<u8> {
        struct Throttle {
            out: Vec<u8>,
            chunk: usize,
        }
        impl Write for Throttle {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(self.chunk);
                self.out.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
                let mut left = self.chunk;
                let mut total = 0;
                for b in bufs {
                    if left == 0 {
                        break;
                    }
                    let n = b.len().min(left);
                    self.out.extend_from_slice(&b[..n]);
                    left -= n;
                    total += n;
                }
                Ok(total)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut w = Throttle {
            out: Vec::new(),
            chunk,
        };
        loop {
            match plan.transmit(&mut w, sources) {
                (_, Transmit::Complete) => return w.out,
                (_, Transmit::Incomplete) => {}
                (_, other) => panic!("unexpected transmit result: {other:?}"),
            }
        }
    }

    #[test]
    fn single_line_reply() {
        let mut plan = ReplyPlan::new();
        plan.reset();
        plan.add_iov(SegSource::Lit(b"STORED\r\n"), 8);
        let out = drain(&mut plan, &empty_sources(), 4096);
        assert_eq!(out, b"STORED\r\n");
    }

    #[test]
    fn first_message_is_capped_and_fragment_split() {
        let mut plan = ReplyPlan::new();
        plan.reset();
        plan.add_iov(SegSource::Lit(lit(3000)), 3000);

        // 1400 bytes in the first message, the remainder in the second.
        assert_eq!(plan.msgs.len(), 2);
        assert_eq!(plan.msgs[0].bytes, MAX_PAYLOAD_SIZE);
        assert_eq!(plan.msgs[1].bytes, 1600);

        let out = drain(&mut plan, &empty_sources(), 4096);
        assert_eq!(out.len(), 3000);
    }

    #[test]
    fn later_messages_are_not_byte_capped() {
        let mut plan = ReplyPlan::new();
        plan.reset();
        plan.add_iov(SegSource::Lit(lit(10_000)), 10_000);
        assert_eq!(plan.msgs.len(), 2);
        assert_eq!(plan.msgs[1].bytes, 8600);
    }

    #[test]
    fn iov_max_starts_a_new_message() {
        let one = lit(1);
        let mut plan = ReplyPlan::new();
        plan.reset();
        for _ in 0..2500 {
            plan.add_iov(SegSource::Lit(one), 1);
        }
        // With one-byte segments the segment-count cap fires before the
        // first message's byte cap: 1024 + 1024 + the rest.
        assert_eq!(plan.msgs.len(), 3);
        assert_eq!(plan.msgs[0].iovlen, IOV_MAX);
        assert_eq!(plan.msgs[1].iovlen, IOV_MAX);
        assert_eq!(plan.msgs[2].iovlen, 2500 - 2 * IOV_MAX);

        let out = drain(&mut plan, &empty_sources(), 100_000);
        assert_eq!(out.len(), 2500);
    }

    #[test]
    fn partial_writes_resume_at_the_exact_byte() {
        let mut expected = Vec::new();
        let mut plan = ReplyPlan::new();
        plan.reset();
        for i in 0..10usize {
            let frag = Box::leak(vec![b'a' + i as u8; 97].into_boxed_slice());
            expected.extend_from_slice(frag);
            plan.add_iov(SegSource::Lit(frag), 97);
        }

        // 13-byte kernel bites exercise both segment-boundary and
        // mid-segment resumes.
        let out = drain(&mut plan, &empty_sources(), 13);
        assert_eq!(out, expected);
    }

    #[test]
    fn multiple_sources_resolve() {
        let items = [Arc::new(Item::new(b"foo", 7, 1, b"hello"))];
        let sources = Sources {
            write_buf: b"unused",
            heap_buf: &[],
            items: &items,
        };

        let mut plan = ReplyPlan::new();
        plan.reset();
        plan.add_iov(SegSource::Lit(b"VALUE "), 6);
        plan.add_iov(SegSource::ItemKey(0), 3);
        plan.add_iov(SegSource::ItemBody(0), items[0].suffix_and_body().len());
        plan.add_iov(SegSource::Lit(b"END\r\n"), 5);

        let out = drain(&mut plan, &sources, 4096);
        assert_eq!(out, b"VALUE foo 7 5\r\nhello\r\nEND\r\n");
    }

    #[test]
    fn shrink_trims_oversized_lists() {
        let one = lit(1);
        let mut plan = ReplyPlan::new();
        plan.reset();
        for _ in 0..5000 {
            plan.add_iov(SegSource::Lit(one), 1);
        }
        assert!(plan.segs.capacity() > SEG_LIST_HIGHWAT);
        plan.shrink();
        assert!(plan.segs.capacity() <= SEG_LIST_HIGHWAT);
        assert!(plan.msgs.capacity() <= MSG_LIST_HIGHWAT);
    }
}
