//! Process-wide serving counters and the `stats` report.
//!
//! One counter group for the whole process, incremented from every worker.
//! `stats reset` clears the command and byte counters but not the
//! connection-structure gauges.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::Store;

/// Serving counters. All monotonically increasing except `curr_conns`.
pub struct Stats {
    pub curr_conns: AtomicU64,
    pub total_conns: AtomicU64,
    /// Connection buffer sets ever allocated (freelist misses).
    pub conn_structs: AtomicU64,
    pub cmd_get: AtomicU64,
    pub cmd_set: AtomicU64,
    pub cmd_delete: AtomicU64,
    pub slow_cmds: AtomicU64,
    pub get_hits: AtomicU64,
    pub get_misses: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    /// Unix seconds, backdated two seconds so uptime is never zero.
    started: i64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            curr_conns: AtomicU64::new(0),
            total_conns: AtomicU64::new(0),
            conn_structs: AtomicU64::new(0),
            cmd_get: AtomicU64::new(0),
            cmd_set: AtomicU64::new(0),
            cmd_delete: AtomicU64::new(0),
            slow_cmds: AtomicU64::new(0),
            get_hits: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            started: unix_now() - 2,
        }
    }

    /// `stats reset`: clears the resettable counters.
    pub fn reset(&self) {
        self.total_conns.store(0, Ordering::Relaxed);
        self.cmd_get.store(0, Ordering::Relaxed);
        self.cmd_set.store(0, Ordering::Relaxed);
        self.cmd_delete.store(0, Ordering::Relaxed);
        self.slow_cmds.store(0, Ordering::Relaxed);
        self.get_hits.store(0, Ordering::Relaxed);
        self.get_misses.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn decr_curr_conns(&self) {
        self.curr_conns.fetch_sub(1, Ordering::Relaxed);
    }

    /// Build the `stats` report body: `STAT <name> <value>` lines terminated
    /// by `END`, in the order legacy tooling expects. The caller frames it
    /// with CRLF.
    pub fn report(&self, store: &dyn Store, item_buf_size: usize, threads: usize) -> String {
        use std::fmt::Write;

        let now = unix_now();
        let (curr_items, total_items) = store.count();
        let (total_space, avail_space) = store.space();
        let usage = rusage_self();

        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        let mut out = String::with_capacity(1024);
        let _ = write!(out, "STAT pid {}\r\n", std::process::id());
        let _ = write!(out, "STAT uptime {}\r\n", now - self.started);
        let _ = write!(out, "STAT time {}\r\n", now);
        let _ = write!(out, "STAT version {}\r\n", env!("CARGO_PKG_VERSION"));
        let _ = write!(
            out,
            "STAT pointer_size {}\r\n",
            8 * std::mem::size_of::<usize>()
        );
        let _ = write!(
            out,
            "STAT rusage_user {}.{:06}\r\n",
            usage.ru_utime.tv_sec, usage.ru_utime.tv_usec
        );
        let _ = write!(
            out,
            "STAT rusage_system {}.{:06}\r\n",
            usage.ru_stime.tv_sec, usage.ru_stime.tv_usec
        );
        let _ = write!(out, "STAT rusage_maxrss {}\r\n", maxrss_bytes() / 1024);
        let _ = write!(out, "STAT item_buf_size {}\r\n", item_buf_size);
        let _ = write!(out, "STAT curr_connections {}\r\n", load(&self.curr_conns));
        let _ = write!(out, "STAT total_connections {}\r\n", load(&self.total_conns));
        let _ = write!(
            out,
            "STAT connection_structures {}\r\n",
            load(&self.conn_structs)
        );
        let _ = write!(out, "STAT cmd_get {}\r\n", load(&self.cmd_get));
        let _ = write!(out, "STAT cmd_set {}\r\n", load(&self.cmd_set));
        let _ = write!(out, "STAT cmd_delete {}\r\n", load(&self.cmd_delete));
        let _ = write!(out, "STAT slow_cmd {}\r\n", load(&self.slow_cmds));
        let _ = write!(out, "STAT get_hits {}\r\n", load(&self.get_hits));
        let _ = write!(out, "STAT get_misses {}\r\n", load(&self.get_misses));
        let _ = write!(out, "STAT curr_items {}\r\n", curr_items);
        let _ = write!(out, "STAT total_items {}\r\n", total_items);
        let _ = write!(out, "STAT avail_space {}\r\n", avail_space);
        let _ = write!(out, "STAT total_space {}\r\n", total_space);
        let _ = write!(out, "STAT bytes_read {}\r\n", load(&self.bytes_read));
        let _ = write!(out, "STAT bytes_written {}\r\n", load(&self.bytes_written));
        let _ = write!(out, "STAT threads {}\r\n", threads);
        out.push_str("END");
        out
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn rusage_self() -> libc::rusage {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    unsafe {
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
    }
    usage
}

/// Resident set size in bytes, from /proc/self/statm. Zero when unreadable.
fn maxrss_bytes() -> u64 {
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let rss_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|f| f.parse().ok())
        .unwrap_or(0);
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    rss_pages * page.max(0) as u64
}
