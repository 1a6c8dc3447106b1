//! Shared server context.
//!
//! Everything the original daemon kept in file-scope globals — store handle,
//! stats, settings, freelist, runtime verbosity — lives here and is passed
//! explicitly to every handler.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use beans_proto::MAX_VERBOSITY_LEVEL;

use crate::config::Settings;
use crate::pool::ConnPool;
use crate::signal;
use crate::stats::Stats;
use crate::store::Store;

pub struct ServerContext {
    pub settings: Settings,
    pub stats: Stats,
    pub store: Arc<dyn Store>,
    pub pool: ConnPool,
    verbosity: AtomicU32,
    /// Server-scoped quit flag (`stopme`, shutdown handle). Process signals
    /// raise the global flag; both are observed.
    quit: AtomicBool,
}

impl ServerContext {
    pub fn new(settings: Settings, store: Arc<dyn Store>) -> Self {
        let pool = ConnPool::new(settings.max_read_buffer);
        let verbosity = AtomicU32::new(settings.verbosity.min(MAX_VERBOSITY_LEVEL));
        Self {
            settings,
            stats: Stats::new(),
            store,
            pool,
            verbosity,
            quit: AtomicBool::new(false),
        }
    }

    /// Request a graceful wind-down of this server.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    /// True once this server (or the whole process) should wind down.
    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed) || signal::quit_requested()
    }

    /// Runtime verbosity, adjustable over the wire.
    pub fn verbosity(&self) -> u32 {
        self.verbosity.load(Ordering::Relaxed)
    }

    pub fn set_verbosity(&self, level: u32) {
        self.verbosity
            .store(level.min(MAX_VERBOSITY_LEVEL), Ordering::Relaxed);
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemStore;

    #[test]
    fn verbosity_is_clamped() {
        let ctx = ServerContext::new(Settings::default(), Arc::new(MemStore::new(false)));
        ctx.set_verbosity(99);
        assert_eq!(ctx.verbosity(), MAX_VERBOSITY_LEVEL);
        ctx.set_verbosity(1);
        assert_eq!(ctx.verbosity(), 1);
    }
}
