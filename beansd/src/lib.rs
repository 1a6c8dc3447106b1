//! beansd — the serving layer of a beansdb-style key-value daemon.
//!
//! A thread-per-reactor TCP front end speaking the memcached-flavored text
//! protocol, over a pluggable bitcask-style [`store::Store`]. The hot path
//! is allocation-shy: command lines parse into borrowed views, values read
//! straight off the socket into their item buffer, and get replies go out
//! as scatter/gather segments over storage memory held only until the write
//! drains.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use beansd::config::SettingsBuilder;
//! use beansd::context::ServerContext;
//! use beansd::store::memory::MemStore;
//!
//! fn main() -> Result<(), beansd::error::Error> {
//!     let settings = SettingsBuilder::new().port(7900).threads(4).build()?;
//!     let ctx = Arc::new(ServerContext::new(settings, Arc::new(MemStore::new(false))));
//!     let (shutdown, workers) = beansd::server::launch(ctx)?;
//!     // ... run until signalled ...
//!     shutdown.shutdown();
//!     for w in workers {
//!         let _ = w.join();
//!     }
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod buffer;
pub mod command;
pub mod config;
pub mod conn;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod flusher;
pub mod pool;
pub mod reply;
pub mod server;
pub mod signal;
pub mod stats;
pub mod store;

pub use config::{Settings, SettingsBuilder};
pub use context::ServerContext;
pub use error::Error;
pub use server::{launch, ShutdownHandle};
