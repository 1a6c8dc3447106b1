//! Per-connection state machine.
//!
//! One `Connection` per accepted socket, pinned to one worker. The reactor
//! calls [`Connection::drive`] on every readiness event; the machine runs in
//! a tight loop until it either suspends (re-arm interest and return) or
//! closes. Storage calls are synchronous from the worker's point of view —
//! the machine only ever blocks on the socket.

use std::io::{self, Read};

use beans_proto::response;
use beans_proto::UpdateKind;
use mio::net::TcpStream;
use mio::Interest;
use tracing::debug;

use crate::buffer::FillStatus;
use crate::command;
use crate::context::ServerContext;
use crate::pool::ConnBuffers;
use crate::reply::{SegSource, Sources, Transmit};

pub const DATA_BUFFER_SIZE: usize = 2048;
pub const READ_BUFFER_HIGHWAT: usize = 8192;
pub const ITEM_LIST_INITIAL: usize = 200;
pub const ITEM_LIST_HIGHWAT: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for (or draining) command lines.
    Read,
    /// Reading a set/append value into the pending item.
    Nread,
    /// Discarding the value of a rejected store so the stream stays aligned.
    Swallow,
    /// Draining a single-line reply.
    Write,
    /// Draining a multi-segment get reply over held items.
    Mwrite,
    /// Terminal.
    Closing,
}

/// What the machine wants from the reactor.
#[derive(Debug)]
pub enum Drive {
    /// Re-arm this interest and wait.
    Suspend(Interest),
    /// Deregister and recycle.
    Closed,
}

/// A set/append value being assembled straight off the socket.
pub struct PendingItem {
    pub key: Vec<u8>,
    pub flag: u32,
    pub ver: i32,
    pub comm: UpdateKind,
    /// Value plus the trailing CRLF.
    pub buf: Vec<u8>,
    pub filled: usize,
}

impl PendingItem {
    fn remaining(&self) -> usize {
        self.buf.len() - self.filled
    }
}

pub struct Connection {
    pub stream: TcpStream,
    pub remote: String,
    pub state: State,
    /// Interest currently registered with the reactor.
    pub interest: Interest,
    pub b: ConnBuffers,
    /// Bytes of `wbuf` (or `write_and_free`) framing the pending line.
    pub wbytes: usize,
    /// State to enter once a single-line write drains.
    pub write_and_go: State,
    /// Heap reply released after send (the stats report rides here).
    pub write_and_free: Option<Vec<u8>>,
    pub item: Option<PendingItem>,
    /// Bytes left to discard in `Swallow`.
    pub sbytes: usize,
    pub noreply: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, remote: String, ctx: &ServerContext) -> Self {
        let (b, fresh) = ctx.pool.take();
        if fresh {
            ctx.stats.incr(&ctx.stats.conn_structs);
        }
        ctx.stats.incr(&ctx.stats.curr_conns);
        ctx.stats.incr(&ctx.stats.total_conns);
        if ctx.verbosity() > 1 {
            debug!(remote = %remote, "new client connection");
        }
        Self {
            stream,
            remote,
            state: State::Read,
            interest: Interest::READABLE,
            b,
            wbytes: 0,
            write_and_go: State::Read,
            write_and_free: None,
            item: None,
            sbytes: 0,
            noreply: false,
        }
    }

    /// Tear down and hand the buffers back to the freelist.
    pub fn close(mut self, ctx: &ServerContext) {
        if ctx.verbosity() > 1 {
            debug!(remote = %self.remote, "connection closed");
        }
        self.item = None;
        self.write_and_free = None;
        self.b.ilist.clear();
        ctx.stats.decr_curr_conns();
        ctx.pool.put(self.b);
    }

    /// State transitions funnel through here so entering `Read` always runs
    /// the buffer-shrink pass.
    pub fn set_state(&mut self, state: State) {
        if state != self.state {
            if state == State::Read {
                self.shrink_buffers();
            }
            self.state = state;
        }
    }

    fn shrink_buffers(&mut self) {
        self.b.rbuf.shrink(READ_BUFFER_HIGHWAT, DATA_BUFFER_SIZE);
        if self.b.ilist.capacity() > ITEM_LIST_HIGHWAT {
            self.b.ilist.clear();
            self.b.ilist.shrink_to(ITEM_LIST_INITIAL);
        }
        self.b.plan.shrink();
    }

    /// Frame a single status line. Under `noreply` the line is dropped and
    /// the connection goes straight back to reading.
    pub fn out_string(&mut self, ctx: &ServerContext, line: &str) {
        if self.noreply {
            if ctx.verbosity() > 1 {
                debug!(remote = %self.remote, reply = line, "suppressed by noreply");
            }
            self.noreply = false;
            self.set_state(State::Read);
            return;
        }

        let line = if line.len() + 2 > self.b.wbuf.len() {
            response::SERVER_ERROR_LINE_TOO_LONG
        } else {
            line
        };
        self.b.wbuf[..line.len()].copy_from_slice(line.as_bytes());
        self.b.wbuf[line.len()..line.len() + 2].copy_from_slice(b"\r\n");
        self.wbytes = line.len() + 2;
        self.write_and_free = None;

        self.set_state(State::Write);
        self.write_and_go = State::Read;
    }

    /// Frame a heap buffer that is released once sent. The caller's buffer
    /// should not carry the final CRLF; it is appended here.
    pub fn out_heap(&mut self, mut buf: Vec<u8>) {
        buf.extend_from_slice(b"\r\n");
        self.wbytes = buf.len();
        self.write_and_free = Some(buf);
        self.set_state(State::Write);
        self.write_and_go = State::Read;
    }

    /// Run the machine until it suspends or closes.
    pub fn drive(&mut self, ctx: &ServerContext) -> Drive {
        loop {
            match self.state {
                State::Read => {
                    if self.try_read_command(ctx) {
                        continue;
                    }
                    let (n, status) = self.b.rbuf.fill_from(&mut self.stream);
                    if n > 0 {
                        ctx.stats.add(&ctx.stats.bytes_read, n as u64);
                    }
                    match status {
                        FillStatus::Got => continue,
                        FillStatus::Empty => return Drive::Suspend(Interest::READABLE),
                        FillStatus::Eof => self.set_state(State::Closing),
                        FillStatus::TooLarge => {
                            // The previous reply's drained plan is stale.
                            self.b.plan.reset();
                            self.noreply = false;
                            self.out_string(ctx, response::SERVER_ERROR_TOO_LARGE);
                            self.write_and_go = State::Closing;
                        }
                        FillStatus::Error(e) => {
                            if ctx.verbosity() > 0 {
                                debug!(remote = %self.remote, error = %e, "read failed");
                            }
                            self.set_state(State::Closing);
                        }
                    }
                }

                State::Nread => match self.drive_nread(ctx) {
                    Some(outcome) => return outcome,
                    None => continue,
                },

                State::Swallow => match self.drive_swallow(ctx) {
                    Some(outcome) => return outcome,
                    None => continue,
                },

                State::Write | State::Mwrite => match self.drive_write(ctx) {
                    Some(outcome) => return outcome,
                    None => continue,
                },

                State::Closing => return Drive::Closed,
            }
        }
    }

    /// Process one complete line out of the read buffer, if there is one.
    fn try_read_command(&mut self, ctx: &ServerContext) -> bool {
        if self.b.rbuf.is_empty() {
            return false;
        }
        let nl = match memchr::memchr(b'\n', self.b.rbuf.data()) {
            Some(pos) => pos,
            None => return false,
        };

        let mut line_len = nl;
        if line_len > 0 && self.b.rbuf.data()[line_len - 1] == b'\r' {
            line_len -= 1;
        }
        self.b.cmd.clear();
        self.b.cmd.extend_from_slice(&self.b.rbuf.data()[..line_len]);
        self.b.rbuf.consume(nl + 1);

        // The line lives outside `self` while handlers mutate the reply
        // plan; the allocation is handed back afterwards.
        let line = std::mem::take(&mut self.b.cmd);
        command::process(self, ctx, &line);
        self.b.cmd = line;
        true
    }

    /// `None` = keep looping; `Some` = suspend or close.
    fn drive_nread(&mut self, ctx: &ServerContext) -> Option<Drive> {
        let item = match self.item.as_mut() {
            Some(item) => item,
            None => {
                self.set_state(State::Closing);
                return None;
            }
        };

        if item.remaining() == 0 {
            self.complete_nread(ctx);
            return None;
        }

        // Leftover bytes from the command read come first.
        if !self.b.rbuf.is_empty() {
            let filled = item.filled;
            let n = self.b.rbuf.take_into(&mut item.buf[filled..]);
            item.filled += n;
            return None;
        }

        let filled = item.filled;
        match self.stream.read(&mut item.buf[filled..]) {
            Ok(0) => {
                self.set_state(State::Closing);
                None
            }
            Ok(n) => {
                ctx.stats.add(&ctx.stats.bytes_read, n as u64);
                item.filled += n;
                None
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Some(Drive::Suspend(Interest::READABLE))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(e) => {
                if ctx.verbosity() > 0 {
                    debug!(remote = %self.remote, error = %e, "value read failed");
                }
                self.set_state(State::Closing);
                None
            }
        }
    }

    /// The value arrived in full: validate framing, store, reply.
    fn complete_nread(&mut self, ctx: &ServerContext) {
        ctx.stats.incr(&ctx.stats.cmd_set);

        let item = match self.item.take() {
            Some(item) => item,
            None => {
                self.set_state(State::Closing);
                return;
            }
        };

        if !item.buf.ends_with(b"\r\n") {
            self.out_string(ctx, response::CLIENT_ERROR_BAD_CHUNK);
            return;
        }
        let value = &item.buf[..item.buf.len() - 2];

        let reply = match item.comm {
            UpdateKind::Set => {
                use crate::store::SetOutcome::*;
                match ctx.store.set(&item.key, value, item.flag, item.ver) {
                    Stored => response::STORED,
                    Exists => response::EXISTS,
                    NotFound => response::NOT_FOUND,
                    NotStored => response::NOT_STORED,
                }
            }
            UpdateKind::Append => {
                if ctx.store.append(&item.key, value) {
                    response::STORED
                } else {
                    response::NOT_STORED
                }
            }
        };
        self.out_string(ctx, reply);
    }

    fn drive_swallow(&mut self, ctx: &ServerContext) -> Option<Drive> {
        if self.sbytes == 0 {
            self.set_state(State::Read);
            return None;
        }

        if !self.b.rbuf.is_empty() {
            let n = self.b.rbuf.len().min(self.sbytes);
            self.b.rbuf.consume(n);
            self.sbytes -= n;
            return None;
        }

        let mut scratch = [0u8; DATA_BUFFER_SIZE];
        let want = self.sbytes.min(scratch.len());
        match self.stream.read(&mut scratch[..want]) {
            Ok(0) => {
                self.set_state(State::Closing);
                None
            }
            Ok(n) => {
                ctx.stats.add(&ctx.stats.bytes_read, n as u64);
                self.sbytes -= n;
                None
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Some(Drive::Suspend(Interest::READABLE))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(_) => {
                self.set_state(State::Closing);
                None
            }
        }
    }

    fn drive_write(&mut self, ctx: &ServerContext) -> Option<Drive> {
        if self.state == State::Write && self.b.plan.is_empty() {
            let src = if self.write_and_free.is_some() {
                SegSource::HeapBuf
            } else {
                SegSource::WriteBuf
            };
            self.b.plan.add_iov(src, self.wbytes);
        }

        let sources = Sources {
            write_buf: &self.b.wbuf[..self.wbytes.min(self.b.wbuf.len())],
            heap_buf: self.write_and_free.as_deref().unwrap_or(&[]),
            items: &self.b.ilist,
        };
        let (written, result) = self.b.plan.transmit(&mut self.stream, &sources);
        if written > 0 {
            ctx.stats.add(&ctx.stats.bytes_written, written as u64);
        }

        match result {
            Transmit::Complete => {
                if self.state == State::Mwrite {
                    // Release the storage items backing the reply.
                    self.b.ilist.clear();
                    self.set_state(State::Read);
                } else {
                    self.write_and_free = None;
                    let next = self.write_and_go;
                    self.set_state(next);
                }
                None
            }
            Transmit::Incomplete => None,
            Transmit::SoftError => Some(Drive::Suspend(Interest::WRITABLE)),
            Transmit::HardError(e) => {
                if ctx.verbosity() > 0 {
                    debug!(remote = %self.remote, error = %e, "write failed");
                }
                self.set_state(State::Closing);
                None
            }
        }
    }
}
