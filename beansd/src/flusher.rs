//! Background flush task.
//!
//! One thread nudges the store to persist once a second with the configured
//! limit and period, exiting within one sleep interval of the quit flag.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::context::ServerContext;

pub fn spawn(ctx: Arc<ServerContext>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("beansd-flush".to_string())
        .spawn(move || {
            while !ctx.quit_requested() {
                ctx.store
                    .flush(ctx.settings.flush_limit, ctx.settings.flush_period);
                thread::sleep(Duration::from_secs(1));
            }
            info!("flush thread exit");
        })
}
