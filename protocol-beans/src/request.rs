//! Server-side command parsing.
//!
//! [`Request::parse`] turns one command line (CRLF already stripped) into a
//! typed request with zero-copy key and field slices. Arity is counted the
//! way the dispatch table counts: real tokens plus the terminal marker.

use crate::error::ParseError;
use crate::token::{tokenize, TokenLine};
use crate::MAX_KEY_LEN;

/// Which store call a value-bearing command resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Set,
    Append,
}

/// Subcommand of `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSub {
    /// Plain `stats`: the full report.
    Report,
    /// `stats reset`.
    Reset,
    /// Anything else: replied as `ERROR`.
    Unknown,
}

/// A parsed command with references into the original line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// `get K1 K2 …` — keys collected across tokenizer continuation passes.
    Get { keys: Vec<&'a [u8]> },
    /// `set`/`append K F E L [noreply]`. The value follows on the wire;
    /// `vlen` is its length excluding the trailing CRLF.
    Update {
        comm: UpdateKind,
        key: &'a [u8],
        flags: u32,
        ver: i64,
        vlen: usize,
        noreply: bool,
    },
    /// `incr K DELTA [noreply]`.
    Incr {
        key: &'a [u8],
        delta: u64,
        noreply: bool,
    },
    /// `delete K [noreply]`.
    Delete { key: &'a [u8], noreply: bool },
    /// `stats [SUB]`.
    Stats { sub: StatsSub },
    /// `flush_all [LIMIT [TREE]] [noreply]`.
    FlushAll {
        limit: i64,
        tree: &'a [u8],
        noreply: bool,
    },
    /// `optimize_stat`.
    OptimizeStat,
    /// `verbosity N`.
    Verbosity { level: u32 },
    /// `version`.
    Version,
    /// `quit`.
    Quit,
    /// `stopme` — honored only when the server was started with stop enabled.
    StopMe,
}

impl<'a> Request<'a> {
    /// Parse one command line (CRLF already stripped).
    pub fn parse(line: &'a [u8]) -> Result<Self, ParseError> {
        let tl = tokenize(line, 0);
        let ntokens = tl.ntokens();
        if tl.tokens().is_empty() {
            return Err(ParseError::Unknown);
        }
        let cmd = tl.token(line, 0);

        let req = match cmd {
            b"get" if ntokens >= 3 => parse_get(line, &tl)?,
            b"set" if ntokens == 6 || ntokens == 7 => {
                parse_update(line, &tl, UpdateKind::Set)?
            }
            b"append" if ntokens == 6 || ntokens == 7 => {
                parse_update(line, &tl, UpdateKind::Append)?
            }
            b"incr" if ntokens == 4 || ntokens == 5 => parse_incr(line, &tl)?,
            b"delete" if ntokens == 3 || ntokens == 4 => parse_delete(line, &tl)?,
            b"stats" if ntokens >= 2 => {
                let sub = if ntokens == 2 {
                    StatsSub::Report
                } else if tl.token(line, 1) == b"reset" {
                    StatsSub::Reset
                } else {
                    StatsSub::Unknown
                };
                Request::Stats { sub }
            }
            b"flush_all" if (2..=4).contains(&ntokens) => parse_flush_all(line, &tl)?,
            b"optimize_stat" if ntokens == 2 => Request::OptimizeStat,
            b"verbosity" if ntokens == 3 => {
                let level = parse_num::<u32>(tl.token(line, 1))?;
                Request::Verbosity { level }
            }
            b"version" if ntokens == 2 => Request::Version,
            b"quit" if ntokens == 2 => Request::Quit,
            b"stopme" if ntokens == 2 => Request::StopMe,
            _ => return Err(ParseError::Unknown),
        };

        Ok(req)
    }

    /// True when the reply for this request is suppressed.
    pub fn noreply(&self) -> bool {
        match *self {
            Request::Update { noreply, .. }
            | Request::Incr { noreply, .. }
            | Request::Delete { noreply, .. }
            | Request::FlushAll { noreply, .. } => noreply,
            _ => false,
        }
    }
}

/// The last real token equals the literal `noreply`. A trailing token that
/// is anything else is ignored, matching the original daemon.
fn noreply_maybe(line: &[u8], tl: &TokenLine, base_arity: usize) -> bool {
    tl.ntokens() == base_arity + 1 && tl.token(line, base_arity - 1) == b"noreply"
}

fn parse_get<'a>(line: &'a [u8], first: &TokenLine) -> Result<Request<'a>, ParseError> {
    let mut keys = Vec::with_capacity(first.tokens().len() - 1);
    for t in &first.tokens()[1..] {
        keys.push(&line[t.off..t.off + t.len]);
    }
    // Keys past the first pass continue tokenization of the remainder.
    let mut rest = first.rest();
    while let Some(off) = rest {
        let tl = tokenize(line, off);
        for t in tl.tokens() {
            keys.push(&line[t.off..t.off + t.len]);
        }
        rest = tl.rest();
    }
    Ok(Request::Get { keys })
}

fn parse_update<'a>(
    line: &'a [u8],
    tl: &TokenLine,
    comm: UpdateKind,
) -> Result<Request<'a>, ParseError> {
    let key = tl.token(line, 1);
    if key.len() > MAX_KEY_LEN {
        return Err(ParseError::BadFormat);
    }
    let flags = parse_num::<u32>(tl.token(line, 2))?;
    let ver = parse_num::<i64>(tl.token(line, 3))?;
    let vlen = parse_num::<i32>(tl.token(line, 4))?;
    if vlen < 0 {
        return Err(ParseError::BadFormat);
    }
    Ok(Request::Update {
        comm,
        key,
        flags,
        ver,
        vlen: vlen as usize,
        noreply: noreply_maybe(line, tl, 6),
    })
}

fn parse_incr<'a>(line: &'a [u8], tl: &TokenLine) -> Result<Request<'a>, ParseError> {
    let key = tl.token(line, 1);
    if key.len() > MAX_KEY_LEN {
        return Err(ParseError::BadFormat);
    }
    let delta =
        parse_num::<u64>(tl.token(line, 2)).map_err(|_| ParseError::BadDelta)?;
    Ok(Request::Incr {
        key,
        delta,
        noreply: noreply_maybe(line, tl, 4),
    })
}

fn parse_delete<'a>(line: &'a [u8], tl: &TokenLine) -> Result<Request<'a>, ParseError> {
    let key = tl.token(line, 1);
    if key.len() > MAX_KEY_LEN {
        return Err(ParseError::BadFormat);
    }
    Ok(Request::Delete {
        key,
        noreply: noreply_maybe(line, tl, 3),
    })
}

fn parse_flush_all<'a>(line: &'a [u8], tl: &TokenLine) -> Result<Request<'a>, ParseError> {
    let noreply = tl.ntokens() >= 3 && tl.token(line, tl.ntokens() - 2) == b"noreply";
    let ntokens = tl.ntokens() - usize::from(noreply);

    let mut limit = 10000i64;
    let mut tree: &[u8] = b"@";
    if ntokens >= 3 {
        limit = parse_num::<i64>(tl.token(line, 1))?;
        if ntokens >= 4 {
            tree = tl.token(line, 2);
        }
    }
    Ok(Request::FlushAll {
        limit,
        tree,
        noreply,
    })
}

fn parse_num<T: std::str::FromStr>(data: &[u8]) -> Result<T, ParseError> {
    std::str::from_utf8(data)
        .map_err(|_| ParseError::BadFormat)?
        .parse()
        .map_err(|_| ParseError::BadFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &[u8]) -> Request<'_> {
        Request::parse(line).unwrap()
    }

    #[test]
    fn parse_get_single() {
        match parse(b"get mykey") {
            Request::Get { keys } => assert_eq!(keys, vec![&b"mykey"[..]]),
            other => panic!("expected Get, got {other:?}"),
        }
    }

    #[test]
    fn parse_get_many_keys_spans_passes() {
        // Twelve keys force two continuation passes through the tokenizer.
        let line = b"get k0 k1 k2 k3 k4 k5 k6 k7 k8 k9 k10 k11";
        match parse(line) {
            Request::Get { keys } => {
                assert_eq!(keys.len(), 12);
                assert_eq!(keys[0], b"k0");
                assert_eq!(keys[11], b"k11");
            }
            other => panic!("expected Get, got {other:?}"),
        }
    }

    #[test]
    fn get_requires_a_key() {
        assert_eq!(Request::parse(b"get"), Err(ParseError::Unknown));
    }

    #[test]
    fn parse_set() {
        match parse(b"set fruit 7 3 5") {
            Request::Update {
                comm,
                key,
                flags,
                ver,
                vlen,
                noreply,
            } => {
                assert_eq!(comm, UpdateKind::Set);
                assert_eq!(key, b"fruit");
                assert_eq!(flags, 7);
                assert_eq!(ver, 3);
                assert_eq!(vlen, 5);
                assert!(!noreply);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn parse_set_noreply() {
        assert!(parse(b"set fruit 7 3 5 noreply").noreply());
    }

    #[test]
    fn trailing_garbage_token_is_not_noreply() {
        let req = parse(b"set fruit 7 3 5 banana");
        assert!(!req.noreply());
    }

    #[test]
    fn negative_length_is_bad_format() {
        assert_eq!(Request::parse(b"set k 0 0 -1"), Err(ParseError::BadFormat));
    }

    #[test]
    fn non_numeric_flags_are_bad_format() {
        assert_eq!(
            Request::parse(b"set k abc 0 5"),
            Err(ParseError::BadFormat)
        );
    }

    #[test]
    fn negative_version_is_accepted() {
        match parse(b"set k 0 -7 5") {
            Request::Update { ver, .. } => assert_eq!(ver, -7),
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn oversized_key_is_bad_format() {
        let mut line = b"set ".to_vec();
        line.extend(std::iter::repeat(b'k').take(MAX_KEY_LEN + 1));
        line.extend_from_slice(b" 0 0 1");
        assert_eq!(Request::parse(&line), Err(ParseError::BadFormat));
    }

    #[test]
    fn parse_append() {
        match parse(b"append k 0 0 3") {
            Request::Update { comm, .. } => assert_eq!(comm, UpdateKind::Append),
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn parse_incr() {
        match parse(b"incr counter 5") {
            Request::Incr {
                key,
                delta,
                noreply,
            } => {
                assert_eq!(key, b"counter");
                assert_eq!(delta, 5);
                assert!(!noreply);
            }
            other => panic!("expected Incr, got {other:?}"),
        }
    }

    #[test]
    fn bad_delta_has_its_own_error() {
        assert_eq!(
            Request::parse(b"incr counter abc"),
            Err(ParseError::BadDelta)
        );
    }

    #[test]
    fn parse_delete_noreply() {
        match parse(b"delete k noreply") {
            Request::Delete { key, noreply } => {
                assert_eq!(key, b"k");
                assert!(noreply);
            }
            other => panic!("expected Delete, got {other:?}"),
        }
    }

    #[test]
    fn parse_stats_variants() {
        assert_eq!(
            parse(b"stats"),
            Request::Stats {
                sub: StatsSub::Report
            }
        );
        assert_eq!(
            parse(b"stats reset"),
            Request::Stats {
                sub: StatsSub::Reset
            }
        );
        assert_eq!(
            parse(b"stats bogus"),
            Request::Stats {
                sub: StatsSub::Unknown
            }
        );
    }

    #[test]
    fn parse_flush_all_defaults() {
        match parse(b"flush_all") {
            Request::FlushAll { limit, tree, .. } => {
                assert_eq!(limit, 10000);
                assert_eq!(tree, b"@");
            }
            other => panic!("expected FlushAll, got {other:?}"),
        }
    }

    #[test]
    fn parse_flush_all_limit_and_tree() {
        match parse(b"flush_all 500 3f") {
            Request::FlushAll { limit, tree, .. } => {
                assert_eq!(limit, 500);
                assert_eq!(tree, b"3f");
            }
            other => panic!("expected FlushAll, got {other:?}"),
        }
    }

    #[test]
    fn parse_flush_all_limit_noreply() {
        match parse(b"flush_all 500 noreply") {
            Request::FlushAll {
                limit,
                tree,
                noreply,
            } => {
                assert_eq!(limit, 500);
                assert_eq!(tree, b"@");
                assert!(noreply);
            }
            other => panic!("expected FlushAll, got {other:?}"),
        }
    }

    #[test]
    fn flush_all_with_everything_is_too_long() {
        // LIMIT + TREE + noreply exceeds the accepted arity.
        assert_eq!(
            Request::parse(b"flush_all 500 3f noreply"),
            Err(ParseError::Unknown)
        );
    }

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse(b"version"), Request::Version);
        assert_eq!(parse(b"quit"), Request::Quit);
        assert_eq!(parse(b"optimize_stat"), Request::OptimizeStat);
        assert_eq!(parse(b"stopme"), Request::StopMe);
        assert_eq!(parse(b"verbosity 1"), Request::Verbosity { level: 1 });
    }

    #[test]
    fn wrong_arity_is_unknown() {
        assert_eq!(Request::parse(b"version now"), Err(ParseError::Unknown));
        assert_eq!(Request::parse(b"set k 0 0"), Err(ParseError::Unknown));
        assert_eq!(Request::parse(b"bogus"), Err(ParseError::Unknown));
    }

    #[test]
    fn empty_line_is_unknown() {
        assert_eq!(Request::parse(b""), Err(ParseError::Unknown));
    }
}
