//! Whitespace tokenizer over a read-only command line.
//!
//! At most [`MAX_TOKENS`] slots are filled per pass: up to `MAX_TOKENS - 1`
//! real tokens plus a terminal marker. The terminal marker has length zero
//! and records the offset of the first unprocessed byte, so a line with more
//! tokens than one pass can hold (a long multi-key `get`) is consumed by
//! calling [`tokenize`] again from that offset.

/// Maximum token slots per tokenizer pass, terminal marker included.
pub const MAX_TOKENS: usize = 8;

/// One token: an `(offset, len)` view into the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Token {
    pub off: usize,
    pub len: usize,
}

/// The result of one tokenizer pass.
#[derive(Debug, Clone)]
pub struct TokenLine {
    toks: [Token; MAX_TOKENS],
    /// Real tokens filled (terminal marker not included).
    filled: usize,
    /// Offset of the first unprocessed byte, if the pass stopped early.
    rest: Option<usize>,
}

impl TokenLine {
    /// Token count the way the dispatch table counts: real tokens plus the
    /// terminal marker.
    pub fn ntokens(&self) -> usize {
        self.filled + 1
    }

    /// The real tokens of this pass.
    pub fn tokens(&self) -> &[Token] {
        &self.toks[..self.filled]
    }

    /// Bytes of token `i` within `line`.
    pub fn token<'a>(&self, line: &'a [u8], i: usize) -> &'a [u8] {
        let t = self.toks[i];
        &line[t.off..t.off + t.len]
    }

    /// Where the next pass should resume, or `None` if the line is consumed.
    pub fn rest(&self) -> Option<usize> {
        self.rest
    }
}

/// Tokenize `line` starting at `start`, splitting on single spaces.
///
/// Empty fields (runs of spaces) produce no tokens.
pub fn tokenize(line: &[u8], start: usize) -> TokenLine {
    let mut toks = [Token::default(); MAX_TOKENS];
    let mut filled = 0;
    let mut s = start;
    let mut e = start;

    while filled < MAX_TOKENS - 1 {
        if e == line.len() {
            if s != e {
                toks[filled] = Token { off: s, len: e - s };
                filled += 1;
            }
            break;
        }
        if line[e] == b' ' {
            if s != e {
                toks[filled] = Token { off: s, len: e - s };
                filled += 1;
            }
            s = e + 1;
        }
        e += 1;
    }

    let rest = if e < line.len() { Some(e) } else { None };
    TokenLine { toks, filled, rest }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_spaces() {
        let line = b"set key 0 0 5";
        let tl = tokenize(line, 0);
        assert_eq!(tl.ntokens(), 6);
        assert_eq!(tl.token(line, 0), b"set");
        assert_eq!(tl.token(line, 1), b"key");
        assert_eq!(tl.token(line, 4), b"5");
        assert_eq!(tl.rest(), None);
    }

    #[test]
    fn collapses_space_runs() {
        let line = b"get   a  b";
        let tl = tokenize(line, 0);
        assert_eq!(tl.ntokens(), 4);
        assert_eq!(tl.token(line, 1), b"a");
        assert_eq!(tl.token(line, 2), b"b");
    }

    #[test]
    fn empty_line_is_terminal_only() {
        let tl = tokenize(b"", 0);
        assert_eq!(tl.ntokens(), 1);
        assert!(tl.tokens().is_empty());
        assert_eq!(tl.rest(), None);
    }

    #[test]
    fn long_line_leaves_a_rest_offset() {
        let line = b"get k1 k2 k3 k4 k5 k6 k7 k8 k9";
        let tl = tokenize(line, 0);
        // Seven real tokens fit; the rest offset lands on "k7".
        assert_eq!(tl.tokens().len(), MAX_TOKENS - 1);
        assert_eq!(tl.token(line, 6), b"k6");
        let rest = tl.rest().unwrap();
        assert_eq!(&line[rest..rest + 2], b"k7");

        let tl2 = tokenize(line, rest);
        assert_eq!(tl2.token(line, 0), b"k7");
        assert_eq!(tl2.token(line, 2), b"k9");
        assert_eq!(tl2.rest(), None);
    }

    #[test]
    fn exact_fit_consumes_the_line() {
        let line = b"get k1 k2 k3 k4 k5 k6";
        let tl = tokenize(line, 0);
        assert_eq!(tl.tokens().len(), MAX_TOKENS - 1);
        assert_eq!(tl.rest(), None);
    }

    #[test]
    fn trailing_space_yields_no_empty_token() {
        let line = b"delete key ";
        let tl = tokenize(line, 0);
        assert_eq!(tl.ntokens(), 3);
        assert_eq!(tl.token(line, 1), b"key");
    }
}
