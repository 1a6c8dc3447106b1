//! Server bootstrap: listener creation, fd-limit raise, worker and acceptor
//! threads, and graceful shutdown.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use mio::{Poll, Waker};
use tracing::info;

use crate::acceptor::{run_acceptor, AcceptorConfig};
use crate::context::ServerContext;
use crate::error::Error;
use crate::event_loop::{EventLoop, WAKER_TOKEN};

const LISTEN_BACKLOG: libc::c_int = 1024;

/// Result of `launch`: the shutdown handle plus one join handle per worker.
type LaunchResult = Result<(ShutdownHandle, Vec<thread::JoinHandle<Result<(), Error>>>), Error>;

/// Handle for triggering graceful shutdown of the acceptor and all workers.
pub struct ShutdownHandle {
    ctx: Arc<ServerContext>,
    listen_fd: RawFd,
    listen_fd_closed: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
}

impl ShutdownHandle {
    /// Raise the quit flag, close the listener to unblock the acceptor, and
    /// wake every worker so the flag is seen promptly.
    pub fn shutdown(&self) {
        self.ctx.request_quit();
        if !self.listen_fd_closed.swap(true, Ordering::AcqRel) {
            unsafe {
                libc::close(self.listen_fd);
            }
        }
        for waker in &self.wakers {
            let _ = waker.wake();
        }
    }
}

/// Bring the serving layer up: raise the fd limit, bind the listener, spawn
/// one reactor thread per configured worker and the acceptor thread.
pub fn launch(ctx: Arc<ServerContext>) -> LaunchResult {
    let num_workers = ctx.settings.num_threads;
    ensure_nofile_limit(ctx.settings.max_conns, num_workers)?;

    let addr = SocketAddr::new(ctx.settings.interface, ctx.settings.port);
    let listen_fd = create_listener(addr)?;
    let listen_fd_closed = Arc::new(AtomicBool::new(false));

    // Per-worker handoff channels and reactor wakers. Wakers must be built
    // from each worker's registry before the poll moves to its thread.
    let mut worker_txs = Vec::with_capacity(num_workers);
    let mut wakers = Vec::with_capacity(num_workers);
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let (tx, rx) = unbounded();
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        worker_txs.push(tx);
        wakers.push(waker);

        let ctx = ctx.clone();
        let handle = thread::Builder::new()
            .name(format!("beansd-worker-{worker_id}"))
            .spawn(move || EventLoop::new(poll, rx, ctx).run())
            .map_err(Error::Io)?;
        handles.push(handle);
    }

    let acceptor_config = AcceptorConfig {
        listen_fd,
        worker_channels: worker_txs,
        worker_wakers: wakers.clone(),
    };
    let acceptor_closed = listen_fd_closed.clone();
    thread::Builder::new()
        .name("beansd-acceptor".to_string())
        .spawn(move || {
            run_acceptor(acceptor_config);
            if !acceptor_closed.swap(true, Ordering::AcqRel) {
                unsafe {
                    libc::close(listen_fd);
                }
            }
        })
        .map_err(Error::Io)?;

    info!(%addr, workers = num_workers, "listening");

    Ok((
        ShutdownHandle {
            ctx,
            listen_fd,
            listen_fd_closed,
            wakers,
        },
        handles,
    ))
}

/// Ensure RLIMIT_NOFILE covers the connection budget plus per-worker and
/// process overhead, raising the soft limit when the hard limit allows.
fn ensure_nofile_limit(max_conns: u32, num_workers: usize) -> Result<(), Error> {
    let mut rlim: libc::rlimit = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    let per_worker_overhead: u64 = 4;
    let global_overhead: u64 = 16;
    let required =
        max_conns as u64 + per_worker_overhead * num_workers as u64 + global_overhead;

    if rlim.rlim_cur >= required {
        return Ok(());
    }

    if rlim.rlim_max >= required || rlim.rlim_max == libc::RLIM_INFINITY {
        rlim.rlim_cur = if rlim.rlim_max == libc::RLIM_INFINITY {
            required
        } else {
            required.min(rlim.rlim_max)
        };
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    } else {
        Err(Error::ResourceLimit(format!(
            "RLIMIT_NOFILE too low: need {} but hard limit is {}. \
             Raise it or request a smaller max_conns.",
            required, rlim.rlim_max
        )))
    }
}

/// Create a bound, listening TCP socket the way the original daemon did:
/// SO_REUSEADDR and SO_KEEPALIVE, linger off, TCP_NODELAY. Left blocking —
/// the acceptor thread parks in `accept4`.
fn create_listener(addr: SocketAddr) -> Result<RawFd, Error> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    let on: libc::c_int = 1;
    let ling = libc::linger {
        l_onoff: 0,
        l_linger: 0,
    };
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &ling as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let addr_len = socket_addr_to_sockaddr(addr, &mut storage);
    if unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, addr_len) } < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(Error::Io(err));
    }

    if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(Error::Io(err));
    }

    Ok(fd)
}

/// Fill a `sockaddr_storage` from a `SocketAddr`; returns the address length.
fn socket_addr_to_sockaddr(
    addr: SocketAddr,
    storage: &mut libc::sockaddr_storage,
) -> libc::socklen_t {
    match addr {
        SocketAddr::V4(v4) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sa).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sa).sin_port = v4.port().to_be();
                (*sa).sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            }
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sa).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sa).sin6_port = v6.port().to_be();
                (*sa).sin6_addr.s6_addr = v6.ip().octets();
                (*sa).sin6_flowinfo = v6.flowinfo();
                (*sa).sin6_scope_id = v6.scope_id();
            }
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}
