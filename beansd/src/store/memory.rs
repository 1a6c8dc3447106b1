//! Sharded in-memory store.
//!
//! Sixteen key-hash shards, each behind its own mutex, so workers rarely
//! contend. Version semantics follow the bitcask engine's contract: version
//! zero auto-increments, a higher version wins, an equal-or-lower version is
//! rejected with `Exists` and leaves the value untouched.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{Item, OptimizeProgress, OptimizeStart, SetOutcome, Store};

const SHARD_COUNT: usize = 16;

/// Reported capacity: the memory budget `space()` is computed against.
const DEFAULT_CAPACITY: u64 = 256 * 1024 * 1024;

type Shard = Mutex<HashMap<Box<[u8]>, Arc<Item>>>;

pub struct MemStore {
    shards: Vec<Shard>,
    total_items: AtomicU64,
    used_bytes: AtomicU64,
    capacity: u64,
    read_only: bool,
    /// Last optimize outcome: -1 success, -2 failed/never-ran.
    optimize_state: AtomicI64,
    optimizing: AtomicBool,
}

impl MemStore {
    pub fn new(read_only: bool) -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::new()));
        }
        Self {
            shards,
            total_items: AtomicU64::new(0),
            used_bytes: AtomicU64::new(0),
            capacity: DEFAULT_CAPACITY,
            read_only,
            optimize_state: AtomicI64::new(-2),
            optimizing: AtomicBool::new(false),
        }
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        &self.shards[h.finish() as usize % SHARD_COUNT]
    }

    fn item_cost(it: &Item) -> u64 {
        (it.key().len() + it.suffix_and_body().len()) as u64
    }

    fn insert(&self, map: &mut HashMap<Box<[u8]>, Arc<Item>>, key: &[u8], it: Item) {
        let it = Arc::new(it);
        self.used_bytes
            .fetch_add(Self::item_cost(&it), Ordering::Relaxed);
        self.total_items.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = map.insert(key.into(), it) {
            self.used_bytes
                .fetch_sub(Self::item_cost(&old), Ordering::Relaxed);
        }
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Option<Arc<Item>> {
        let map = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    fn set(&self, key: &[u8], value: &[u8], flag: u32, ver: i32) -> SetOutcome {
        let mut map = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());
        let next_ver = match map.get(key) {
            Some(old) if ver == 0 => old.ver().wrapping_add(1),
            Some(old) if ver <= old.ver() => return SetOutcome::Exists,
            Some(_) => ver,
            None if ver == 0 => 1,
            None => ver,
        };
        self.insert(&mut map, key, Item::new(key, flag, next_ver, value));
        SetOutcome::Stored
    }

    fn append(&self, key: &[u8], value: &[u8]) -> bool {
        let mut map = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());
        let old = match map.get(key) {
            Some(old) => old.clone(),
            None => return false,
        };
        let mut combined = Vec::with_capacity(old.value().len() + value.len());
        combined.extend_from_slice(old.value());
        combined.extend_from_slice(value);
        let it = Item::new(key, old.flag(), old.ver().wrapping_add(1), &combined);
        self.insert(&mut map, key, it);
        true
    }

    fn incr(&self, key: &[u8], delta: u64) -> u64 {
        let mut map = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());
        // A missing or non-numeric value counts from zero.
        let current: u64 = map
            .get(key)
            .and_then(|it| std::str::from_utf8(it.value()).ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let (flag, ver) = match map.get(key) {
            Some(old) => (old.flag(), old.ver().wrapping_add(1)),
            None => (0, 1),
        };
        let next = current.wrapping_add(delta);
        let it = Item::new(key, flag, ver, next.to_string().as_bytes());
        self.insert(&mut map, key, it);
        next
    }

    fn delete(&self, key: &[u8]) -> bool {
        let mut map = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());
        match map.remove(key) {
            Some(old) => {
                self.used_bytes
                    .fetch_sub(Self::item_cost(&old), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn count(&self) -> (u64, u64) {
        let curr = self
            .shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len() as u64)
            .sum();
        (curr, self.total_items.load(Ordering::Relaxed))
    }

    fn space(&self) -> (u64, u64) {
        let used = self.used_bytes.load(Ordering::Relaxed);
        (self.capacity, self.capacity.saturating_sub(used))
    }

    fn flush(&self, limit_kb: u32, period_secs: u32) {
        // Nothing is ever dirty in memory; the hook stays observable.
        debug!(limit_kb, period_secs, "flush");
    }

    fn optimize(&self, limit: i64, tree: &[u8]) -> OptimizeStart {
        if self.read_only {
            return OptimizeStart::ReadOnly;
        }
        if self.optimizing.load(Ordering::Acquire) {
            return OptimizeStart::Running;
        }
        if limit < 0 || !is_valid_tree(tree) {
            return OptimizeStart::BadTree;
        }
        // An in-memory pass has nothing to compact; it completes immediately.
        self.optimize_state.store(-1, Ordering::Release);
        OptimizeStart::Started
    }

    fn optimize_progress(&self) -> OptimizeProgress {
        match self.optimize_state.load(Ordering::Acquire) {
            -1 => OptimizeProgress::Success,
            n if n >= 0 => OptimizeProgress::Bucket(n as u32),
            _ => OptimizeProgress::Failed,
        }
    }

    fn close(&self) {
        debug!("store closed");
    }
}

/// A bucket tree name is `@` (the root) optionally followed by hex digits.
fn is_valid_tree(tree: &[u8]) -> bool {
    let digits = match tree.first() {
        Some(b'@') => &tree[1..],
        _ => tree,
    };
    digits.iter().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = MemStore::new(false);
        assert_eq!(store.set(b"k", b"hello", 7, 0), SetOutcome::Stored);
        let it = store.get(b"k").unwrap();
        assert_eq!(it.value(), b"hello");
        assert_eq!(it.flag(), 7);
        assert_eq!(it.ver(), 1);
    }

    #[test]
    fn version_zero_auto_increments() {
        let store = MemStore::new(false);
        store.set(b"k", b"a", 0, 0);
        store.set(b"k", b"b", 0, 0);
        assert_eq!(store.get(b"k").unwrap().ver(), 2);
    }

    #[test]
    fn stale_version_is_rejected_and_value_unchanged() {
        let store = MemStore::new(false);
        store.set(b"k", b"first", 0, 5);
        assert_eq!(store.set(b"k", b"second", 0, 5), SetOutcome::Exists);
        assert_eq!(store.set(b"k", b"second", 0, 3), SetOutcome::Exists);
        assert_eq!(store.get(b"k").unwrap().value(), b"first");

        assert_eq!(store.set(b"k", b"third", 0, 6), SetOutcome::Stored);
        assert_eq!(store.get(b"k").unwrap().value(), b"third");
    }

    #[test]
    fn append_requires_existing_key() {
        let store = MemStore::new(false);
        assert!(!store.append(b"k", b"x"));
        store.set(b"k", b"ab", 0, 0);
        assert!(store.append(b"k", b"cd"));
        assert_eq!(store.get(b"k").unwrap().value(), b"abcd");
    }

    #[test]
    fn incr_counts_from_zero() {
        let store = MemStore::new(false);
        assert_eq!(store.incr(b"n", 3), 3);
        assert_eq!(store.incr(b"n", 4), 7);
        assert_eq!(store.get(b"n").unwrap().value(), b"7");
    }

    #[test]
    fn incr_treats_garbage_as_zero() {
        let store = MemStore::new(false);
        store.set(b"n", b"not a number", 0, 0);
        assert_eq!(store.incr(b"n", 5), 5);
    }

    #[test]
    fn delete_reports_presence() {
        let store = MemStore::new(false);
        assert!(!store.delete(b"k"));
        store.set(b"k", b"v", 0, 0);
        assert!(store.delete(b"k"));
        assert!(store.get(b"k").is_none());
    }

    #[test]
    fn counts_track_live_and_total() {
        let store = MemStore::new(false);
        store.set(b"a", b"1", 0, 0);
        store.set(b"b", b"2", 0, 0);
        store.delete(b"a");
        let (curr, total) = store.count();
        assert_eq!(curr, 1);
        assert_eq!(total, 2);
    }

    #[test]
    fn space_shrinks_with_use() {
        let store = MemStore::new(false);
        let (total, avail_before) = store.space();
        store.set(b"k", b"0123456789", 0, 0);
        let (_, avail_after) = store.space();
        assert_eq!(total, DEFAULT_CAPACITY);
        assert!(avail_after < avail_before);
    }

    #[test]
    fn optimize_read_only_and_tree_validation() {
        let ro = MemStore::new(true);
        assert_eq!(ro.optimize(10000, b"@"), OptimizeStart::ReadOnly);

        let rw = MemStore::new(false);
        assert_eq!(rw.optimize(10000, b"not hex!"), OptimizeStart::BadTree);
        assert_eq!(rw.optimize(-1, b"@"), OptimizeStart::BadTree);
        assert_eq!(rw.optimize(10000, b"@"), OptimizeStart::Started);
        assert_eq!(rw.optimize_progress(), OptimizeProgress::Success);
    }

    #[test]
    fn optimize_progress_starts_failed() {
        let store = MemStore::new(false);
        assert_eq!(store.optimize_progress(), OptimizeProgress::Failed);
    }
}
