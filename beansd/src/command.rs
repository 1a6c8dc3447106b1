//! Command dispatch and handlers.
//!
//! One call per complete command line. Handlers build the reply on the
//! connection (single line, or a multi-segment plan for `get`) and move the
//! state machine; value-bearing commands park a pending item and switch to
//! `Nread`, with the payload consumed by the connection's read path.

use std::time::Instant;

use beans_proto::response;
use beans_proto::{ParseError, Request, StatsSub, UpdateKind, MAX_KEY_LEN};
use tracing::{debug, info, warn};

use crate::conn::{Connection, PendingItem, State};
use crate::context::ServerContext;
use crate::reply::SegSource;
use crate::store::{OptimizeProgress, OptimizeStart};

/// Dispatch one command line, with slow-command and access accounting.
pub fn process(conn: &mut Connection, ctx: &ServerContext, line: &[u8]) {
    if ctx.verbosity() > 1 {
        debug!(remote = %conn.remote, line = %String::from_utf8_lossy(line), "command");
    }

    conn.noreply = false;
    conn.b.plan.reset();

    let start = Instant::now();
    match Request::parse(line) {
        Ok(req) => {
            conn.noreply = req.noreply();
            dispatch(conn, ctx, req);
        }
        Err(ParseError::BadFormat) => {
            warn!(line = %String::from_utf8_lossy(line), "bad command line");
            conn.out_string(ctx, response::CLIENT_ERROR_BAD_FORMAT);
        }
        Err(ParseError::BadDelta) => {
            warn!(line = %String::from_utf8_lossy(line), "bad delta");
            conn.out_string(ctx, response::CLIENT_ERROR_BAD_DELTA);
        }
        Err(ParseError::Unknown) => conn.out_string(ctx, response::ERROR),
    }
    let elapsed = start.elapsed();

    if elapsed > ctx.settings.slow_cmd {
        ctx.stats.incr(&ctx.stats.slow_cmds);
    }
    // Anything with a key (two or more real tokens) hits the access log.
    if line.split(|&b| b == b' ').filter(|t| !t.is_empty()).count() >= 2 {
        info!(
            target: "access",
            "{}\t{}\t{:.3}",
            conn.remote,
            String::from_utf8_lossy(line),
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

fn dispatch(conn: &mut Connection, ctx: &ServerContext, req: Request<'_>) {
    match req {
        Request::Get { keys } => process_get(conn, ctx, &keys),
        Request::Update {
            comm,
            key,
            flags,
            ver,
            vlen,
            ..
        } => process_update(conn, ctx, comm, key, flags, ver, vlen),
        Request::Incr { key, delta, .. } => {
            ctx.stats.incr(&ctx.stats.cmd_set);
            let value = ctx.store.incr(key, delta);
            conn.out_string(ctx, &value.to_string());
        }
        Request::Delete { key, .. } => {
            ctx.stats.incr(&ctx.stats.cmd_delete);
            let reply = if ctx.store.delete(key) {
                response::DELETED
            } else {
                response::NOT_FOUND
            };
            conn.out_string(ctx, reply);
        }
        Request::Stats { sub } => match sub {
            StatsSub::Report => {
                let report = ctx.stats.report(
                    ctx.store.as_ref(),
                    ctx.settings.item_buf_size,
                    ctx.settings.num_threads,
                );
                conn.out_heap(report.into_bytes());
            }
            StatsSub::Reset => {
                ctx.stats.reset();
                conn.out_string(ctx, response::RESET);
            }
            StatsSub::Unknown => conn.out_string(ctx, response::ERROR),
        },
        Request::FlushAll { limit, tree, .. } => {
            let reply = match ctx.store.optimize(limit, tree) {
                OptimizeStart::Started => response::OK,
                OptimizeStart::ReadOnly => response::ERROR_READ_ONLY,
                OptimizeStart::Running => response::ERROR_OPTIMIZE_RUNNING,
                OptimizeStart::BadTree => response::CLIENT_ERROR_BAD_FORMAT,
            };
            conn.out_string(ctx, reply);
        }
        Request::OptimizeStat => {
            let reply = match ctx.store.optimize_progress() {
                OptimizeProgress::Bucket(n) => format!("running bitcask 0x{:x}", n),
                OptimizeProgress::Success => "success".to_string(),
                OptimizeProgress::Failed => "fail".to_string(),
            };
            conn.out_string(ctx, &reply);
        }
        Request::Verbosity { level } => {
            ctx.set_verbosity(level);
            conn.out_string(ctx, response::OK);
        }
        Request::Version => {
            let line = response::version_line(ctx.version());
            conn.out_string(ctx, &line);
        }
        Request::Quit => conn.set_state(State::Closing),
        Request::StopMe => {
            if ctx.settings.stop_enabled {
                // No reply; the daemon winds down while the client still
                // holds its connection.
                warn!("quit under request");
                ctx.request_quit();
            } else {
                conn.out_string(ctx, response::ERROR);
            }
        }
    }
}

fn process_get(conn: &mut Connection, ctx: &ServerContext, keys: &[&[u8]]) {
    let mut gets = 0u64;
    let mut hits = 0u64;
    let mut misses = 0u64;

    for &key in keys {
        if key.len() > MAX_KEY_LEN {
            flush_get_stats(ctx, gets, hits, misses);
            // Drop the partial plan and its held items before the error line.
            conn.b.plan.reset();
            conn.b.ilist.clear();
            conn.out_string(ctx, response::CLIENT_ERROR_BAD_FORMAT);
            return;
        }
        gets += 1;

        match ctx.store.get(key) {
            Some(item) => {
                // Three segments per hit: "VALUE ", the key, and the
                // suffix+value region borrowed from the item.
                let idx = conn.b.ilist.len();
                conn.b
                    .plan
                    .add_iov(SegSource::Lit(response::VALUE_PREFIX), response::VALUE_PREFIX.len());
                conn.b.plan.add_iov(SegSource::ItemKey(idx), item.key().len());
                conn.b
                    .plan
                    .add_iov(SegSource::ItemBody(idx), item.suffix_and_body().len());
                if ctx.verbosity() > 1 {
                    debug!(remote = %conn.remote, key = %String::from_utf8_lossy(key), "hit");
                }
                conn.b.ilist.push(item);
                hits += 1;
            }
            None => misses += 1,
        }
    }

    conn.b
        .plan
        .add_iov(SegSource::Lit(response::END), response::END.len());
    conn.b.plan.rewind();
    conn.set_state(State::Mwrite);

    flush_get_stats(ctx, gets, hits, misses);
}

fn flush_get_stats(ctx: &ServerContext, gets: u64, hits: u64, misses: u64) {
    ctx.stats.add(&ctx.stats.cmd_get, gets);
    ctx.stats.add(&ctx.stats.get_hits, hits);
    ctx.stats.add(&ctx.stats.get_misses, misses);
}

fn process_update(
    conn: &mut Connection,
    ctx: &ServerContext,
    comm: UpdateKind,
    key: &[u8],
    flags: u32,
    ver: i64,
    vlen: usize,
) {
    if vlen + 2 > ctx.settings.max_item_size {
        // The value still arrives; swallow it so the next command parses.
        conn.sbytes = vlen + 2;
        if conn.noreply {
            conn.noreply = false;
            conn.set_state(State::Swallow);
        } else {
            conn.out_string(ctx, response::SERVER_ERROR_OOM_OBJECT);
            conn.write_and_go = State::Swallow;
        }
        return;
    }

    conn.item = Some(PendingItem {
        key: key.to_vec(),
        flag: flags,
        ver: ver as i32,
        comm,
        buf: vec![0; vlen + 2],
        filled: 0,
    });
    conn.set_state(State::Nread);
}
