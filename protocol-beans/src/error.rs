use thiserror::Error;

/// Errors produced while parsing a command line.
///
/// Each variant maps to exactly one reply line; the serving layer does the
/// mapping so this crate stays wire-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Malformed command line: bad arity, oversized key, or a numeric field
    /// that failed to parse. Replied as `CLIENT_ERROR bad command line format`.
    #[error("bad command line format")]
    BadFormat,

    /// The delta argument of `incr` was not a decimal number.
    /// Replied as `CLIENT_ERROR invalid numeric delta argument`.
    #[error("invalid numeric delta argument")]
    BadDelta,

    /// Unrecognized command or an arity no command accepts. Replied as `ERROR`.
    #[error("unknown command")]
    Unknown,
}
