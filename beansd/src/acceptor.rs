//! Centralized acceptor thread.
//!
//! Accepts connections via blocking `accept4` and distributes the raw fds
//! round-robin to workers, waking each worker through its reactor waker.
//! Holds a reserve fd open to `/dev/null` so fd exhaustion can be handled
//! without spinning: on EMFILE the reserve is closed, the surplus client is
//! accepted and dropped politely, and the reserve is reopened.
//!
//! Terminates when the listen fd is closed (shutdown) or all workers exit.

use std::fs::File;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;

use crossbeam_channel::Sender;
use mio::Waker;
use tracing::{debug, error, warn};

pub struct AcceptorConfig {
    /// The listening socket fd, kept raw so shutdown can close it from
    /// another thread without a double-close on drop.
    pub listen_fd: RawFd,
    /// Per-worker channels for accepted `(stream, peer)` pairs.
    pub worker_channels: Vec<Sender<(std::net::TcpStream, SocketAddr)>>,
    /// Per-worker reactor wakers.
    pub worker_wakers: Vec<Arc<Waker>>,
}

/// Run the acceptor loop.
pub fn run_acceptor(config: AcceptorConfig) {
    let num_workers = config.worker_channels.len();
    if num_workers == 0 {
        return;
    }

    let mut reserve = open_reserve();
    let mut next_worker = 0usize;
    let mut alive = vec![true; num_workers];
    let mut alive_count = num_workers;

    loop {
        let (fd, peer) = match accept_nonblocking_client(config.listen_fd) {
            Accepted::Conn(fd, peer) => (fd, peer),
            Accepted::Retry => continue,
            Accepted::OutOfFds => {
                // Use the reserve fd to drop exactly one client instead of
                // spinning on a forever-ready listener.
                match reserve.take() {
                    Some(stub) => {
                        drop(stub);
                        if let Accepted::Conn(fd, _) =
                            accept_nonblocking_client(config.listen_fd)
                        {
                            unsafe {
                                libc::close(fd);
                            }
                        } else {
                            error!("too many open connections");
                        }
                        reserve = open_reserve();
                    }
                    None => std::thread::sleep(std::time::Duration::from_millis(10)),
                }
                continue;
            }
            Accepted::Done => return,
        };

        let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        let _ = stream.set_nodelay(true);

        // Round-robin over live workers.
        let mut sent = false;
        let mut handoff = Some((stream, peer));
        for _ in 0..num_workers {
            let worker = next_worker % num_workers;
            next_worker = next_worker.wrapping_add(1);

            if !alive[worker] {
                continue;
            }

            let pair = match handoff.take() {
                Some(pair) => pair,
                None => break,
            };
            match config.worker_channels[worker].send(pair) {
                Ok(()) => {
                    let _ = config.worker_wakers[worker].wake();
                    sent = true;
                    break;
                }
                Err(returned) => {
                    // Worker has exited; reclaim the stream and try the next.
                    handoff = Some(returned.0);
                    alive[worker] = false;
                    alive_count -= 1;
                    if alive_count == 0 {
                        return;
                    }
                }
            }
        }

        if !sent {
            debug!("no live worker for accepted connection");
        }
    }
}

enum Accepted {
    Conn(RawFd, SocketAddr),
    Retry,
    OutOfFds,
    /// Listener closed or fatally broken; stop accepting.
    Done,
}

fn accept_nonblocking_client(listen_fd: RawFd) -> Accepted {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let fd = unsafe {
        libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut addr_len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };

    if fd < 0 {
        let err = std::io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::EINTR) => Accepted::Retry,
            Some(libc::EMFILE) | Some(libc::ENFILE) => Accepted::OutOfFds,
            _ => Accepted::Done,
        };
    }

    Accepted::Conn(fd, peer_addr_of(&storage))
}

fn open_reserve() -> Option<File> {
    match File::open("/dev/null") {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(error = %e, "cannot open reserve fd");
            None
        }
    }
}

/// Peer address out of the `sockaddr_storage` filled by `accept4`.
///
/// The connection record only needs the remote string for logging, so an
/// unrecognized family degrades to the unspecified address instead of
/// costing us the connection.
fn peer_addr_of(storage: &libc::sockaddr_storage) -> SocketAddr {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            (
                std::net::Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr)),
                u16::from_be(sa.sin_port),
            )
                .into()
        }
        libc::AF_INET6 => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            (
                std::net::Ipv6Addr::from(sa.sin6_addr.s6_addr),
                u16::from_be(sa.sin6_port),
            )
                .into()
        }
        _ => SocketAddr::from(([0, 0, 0, 0], 0)),
    }
}
