use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beansd::config::SettingsBuilder;
use beansd::context::ServerContext;
use beansd::store::memory::MemStore;
use beansd::{flusher, server, signal};

#[derive(Parser)]
#[command(name = "beansd", version)]
#[command(about = "A beansdb-style key-value server")]
struct Cli {
    /// TCP port number to listen on
    #[arg(short = 'p', long, default_value_t = 7900)]
    port: u16,

    /// Interface to listen on
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0")]
    listen: IpAddr,

    /// Max simultaneous connections
    #[arg(short = 'c', long = "conns", default_value_t = 1024)]
    max_conns: u32,

    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 16)]
    threads: usize,

    /// Home of the database
    #[arg(short = 'H', long, default_value = "testdb")]
    home: PathBuf,

    /// Log of the number of db files, base 16
    #[arg(short = 'T', long, default_value_t = 1)]
    height: u8,

    /// Item buffer size in bytes
    #[arg(short = 'b', long = "item-buf-size", default_value_t = 4096)]
    item_buf_size: usize,

    /// Slow command time limit in milliseconds
    #[arg(short = 's', long = "slow-ms", default_value_t = 100)]
    slow_ms: u64,

    /// Flush period in seconds
    #[arg(short = 'f', long = "flush-period", default_value_t = 600)]
    flush_period: u32,

    /// Flush limit in KiB
    #[arg(short = 'n', long = "flush-limit", default_value_t = 1024)]
    flush_limit: u32,

    /// Serve data written before this time, read-only
    #[arg(short = 'm', long = "before")]
    before: Option<String>,

    /// Verbose; repeat for protocol-level chatter
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Honor the `stopme` command
    #[arg(short = 'S', long = "stop-enable")]
    stop_enable: bool,

    /// Save the PID to this file
    #[arg(short = 'P', long = "pid-file")]
    pid_file: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("beansd: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), beansd::Error> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    signal::install()?;

    let settings = SettingsBuilder::new()
        .port(cli.port)
        .interface(cli.listen)
        .max_conns(cli.max_conns)
        .threads(cli.threads)
        .item_buf_size(cli.item_buf_size)
        .slow_cmd(Duration::from_millis(cli.slow_ms))
        .flush(cli.flush_period, cli.flush_limit)
        .verbosity(cli.verbose as u32)
        .stop_enabled(cli.stop_enable)
        .build()?;

    if settings.stop_enabled {
        warn!("dangerous: the daemon can be stopped by the 'stopme' command");
    }

    let read_only = cli.before.is_some();
    if let Some(before) = &cli.before {
        warn!(%before, "serving pre-cutoff data read-only");
    }
    info!(home = %cli.home.display(), height = cli.height, "opening store");
    let store = Arc::new(MemStore::new(read_only));

    let ctx = Arc::new(ServerContext::new(settings, store));
    let (shutdown, workers) = server::launch(ctx.clone())?;
    let flush_handle = flusher::spawn(ctx.clone())?;

    if let Some(pid_file) = &cli.pid_file {
        if let Err(e) = std::fs::write(pid_file, format!("{}\n", std::process::id())) {
            error!(path = %pid_file.display(), error = %e, "could not write pid file");
        }
    }

    info!("all ready");

    while !ctx.quit_requested() {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    shutdown.shutdown();
    for worker in workers {
        match worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "worker exited with error"),
            Err(_) => error!("worker panicked"),
        }
    }
    if flush_handle.join().is_err() {
        error!("flush thread panicked");
    }
    ctx.store.close();

    if let Some(pid_file) = &cli.pid_file {
        if let Err(e) = std::fs::remove_file(pid_file) {
            error!(path = %pid_file.display(), error = %e, "could not remove pid file");
        }
    }

    info!("close done");
    Ok(())
}
