//! Per-worker reactor loop.
//!
//! Each worker owns a `mio::Poll`, a slab of connections, and the receiving
//! end of the acceptor's handoff channel. Readiness events run the owning
//! connection's state machine to quiescence; the waker token signals new
//! accepts (and shutdown). The poll timeout bounds how long a quiet worker
//! goes between quit-flag checks.

use std::net::SocketAddr;
use std::time::Duration;

use crossbeam_channel::Receiver;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::conn::{Connection, Drive};
use crate::context::ServerContext;

/// Token reserved for the cross-thread waker.
pub const WAKER_TOKEN: Token = Token(usize::MAX);

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct EventLoop {
    poll: Poll,
    events: Events,
    conns: Slab<Connection>,
    accept_rx: Receiver<(std::net::TcpStream, SocketAddr)>,
    ctx: Arc<ServerContext>,
}

impl EventLoop {
    pub fn new(
        poll: Poll,
        accept_rx: Receiver<(std::net::TcpStream, SocketAddr)>,
        ctx: Arc<ServerContext>,
    ) -> Self {
        Self {
            poll,
            events: Events::with_capacity(1024),
            conns: Slab::new(),
            accept_rx,
            ctx,
        }
    }

    /// Run until the quit flag is raised. Blocks the worker thread.
    pub fn run(&mut self) -> Result<(), crate::error::Error> {
        loop {
            match self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let mut ready = Vec::new();
            for event in self.events.iter() {
                if event.token() != WAKER_TOKEN {
                    ready.push(event.token().0);
                }
            }
            for key in ready {
                self.drive_conn(key);
            }

            // New accepts ride the waker, but drain unconditionally in case
            // wakeups coalesced across poll cycles.
            self.intake_accepts();

            if self.ctx.quit_requested() {
                break;
            }
        }

        self.drain_connections();
        Ok(())
    }

    fn intake_accepts(&mut self) {
        while let Ok((stream, addr)) = self.accept_rx.try_recv() {
            let stream = TcpStream::from_std(stream);
            let conn = Connection::new(stream, addr.to_string(), &self.ctx);
            let key = self.conns.insert(conn);

            let conn = &mut self.conns[key];
            if let Err(e) = self.poll.registry().register(
                &mut conn.stream,
                Token(key),
                Interest::READABLE,
            ) {
                debug!(error = %e, "register failed");
                let conn = self.conns.remove(key);
                conn.close(&self.ctx);
                continue;
            }
            // Run once immediately: with edge-triggered readiness, bytes
            // that raced ahead of registration must not be left waiting.
            self.drive_conn(key);
        }
    }

    /// Run one connection's machine and apply the outcome.
    fn drive_conn(&mut self, key: usize) {
        let outcome = match self.conns.get_mut(key) {
            Some(conn) => conn.drive(&self.ctx),
            None => return,
        };

        match outcome {
            Drive::Closed => {
                let mut conn = self.conns.remove(key);
                let _ = self.poll.registry().deregister(&mut conn.stream);
                conn.close(&self.ctx);
            }
            Drive::Suspend(interest) => {
                let mut rearm_failed = false;
                if let Some(conn) = self.conns.get_mut(key) {
                    if conn.interest != interest {
                        trace!(key, ?interest, "re-arm");
                        if self
                            .poll
                            .registry()
                            .reregister(&mut conn.stream, Token(key), interest)
                            .is_ok()
                        {
                            conn.interest = interest;
                        } else {
                            rearm_failed = true;
                        }
                    }
                }
                if rearm_failed {
                    let mut conn = self.conns.remove(key);
                    let _ = self.poll.registry().deregister(&mut conn.stream);
                    conn.close(&self.ctx);
                }
            }
        }
    }

    /// Shutdown: no in-flight command is aborted mid-parse, but once the
    /// loop exits every connection is torn down and recycled.
    fn drain_connections(&mut self) {
        let keys: Vec<usize> = self.conns.iter().map(|(k, _)| k).collect();
        for key in keys {
            let mut conn = self.conns.remove(key);
            let _ = self.poll.registry().deregister(&mut conn.stream);
            conn.close(&self.ctx);
        }
    }
}
