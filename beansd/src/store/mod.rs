//! The storage-engine boundary.
//!
//! The serving layer only ever talks to a [`Store`]. The bitcask-backed
//! engine lives behind this trait; [`memory::MemStore`] is the in-process
//! implementation the binary and the tests run against.

pub mod memory;

use std::sync::Arc;

use beans_proto::response::item_suffix;

/// Outcome of a `set`, mapped one-to-one onto reply lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Stored,
    Exists,
    NotFound,
    NotStored,
}

/// Outcome of starting an optimize pass (`flush_all` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeStart {
    Started,
    ReadOnly,
    Running,
    /// Unparseable bucket tree argument.
    BadTree,
}

/// What `optimize_stat` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeProgress {
    /// A bucket is being optimized right now.
    Bucket(u32),
    /// The last pass finished cleanly.
    Success,
    Failed,
}

/// A stored value as the reply path sees it.
///
/// The flags/length suffix is kept contiguous with the value and its trailing
/// CRLF, so a get hit goes out as `VALUE ` + key + one borrowed segment. The
/// connection holds the `Arc` until the reply drains.
pub struct Item {
    key: Box<[u8]>,
    flag: u32,
    ver: i32,
    /// `" <flags> <len>\r\n"` + value + `"\r\n"`.
    data: Box<[u8]>,
    nsuffix: usize,
}

impl Item {
    pub fn new(key: &[u8], flag: u32, ver: i32, value: &[u8]) -> Self {
        let suffix = item_suffix(flag, value.len());
        let nsuffix = suffix.len();
        let mut data = Vec::with_capacity(nsuffix + value.len() + 2);
        data.extend_from_slice(&suffix);
        data.extend_from_slice(value);
        data.extend_from_slice(b"\r\n");
        Self {
            key: key.into(),
            flag,
            ver,
            data: data.into_boxed_slice(),
            nsuffix,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn flag(&self) -> u32 {
        self.flag
    }

    pub fn ver(&self) -> i32 {
        self.ver
    }

    /// The suffix, value, and trailing CRLF as one contiguous region.
    pub fn suffix_and_body(&self) -> &[u8] {
        &self.data
    }

    /// The value bytes, CRLF excluded.
    pub fn value(&self) -> &[u8] {
        &self.data[self.nsuffix..self.data.len() - 2]
    }

    /// Value length including the trailing CRLF.
    pub fn nbytes(&self) -> usize {
        self.data.len() - self.nsuffix
    }
}

/// The operations the front end consumes. Implementations provide their own
/// sharding and are safe to call from every worker.
pub trait Store: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Option<Arc<Item>>;

    fn set(&self, key: &[u8], value: &[u8], flag: u32, ver: i32) -> SetOutcome;

    fn append(&self, key: &[u8], value: &[u8]) -> bool;

    /// Atomic add. The reply is always the resulting value.
    fn incr(&self, key: &[u8], delta: u64) -> u64;

    fn delete(&self, key: &[u8]) -> bool;

    /// `(curr_items, total_items)`.
    fn count(&self) -> (u64, u64);

    /// `(total_space, avail_space)` in bytes.
    fn space(&self) -> (u64, u64);

    fn flush(&self, limit_kb: u32, period_secs: u32);

    fn optimize(&self, limit: i64, tree: &[u8]) -> OptimizeStart;

    fn optimize_progress(&self) -> OptimizeProgress;

    /// Final flush and release. Called once during shutdown.
    fn close(&self);
}
