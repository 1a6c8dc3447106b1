//! Reply lines and framing fragments.
//!
//! Status lines are bare (no CRLF); the serving layer frames them. The
//! `VALUE` fragments exist so a get hit can be assembled from borrowed
//! storage memory without copying the value.

pub const STORED: &str = "STORED";
pub const NOT_STORED: &str = "NOT_STORED";
pub const EXISTS: &str = "EXISTS";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const DELETED: &str = "DELETED";
pub const OK: &str = "OK";
pub const RESET: &str = "RESET";
pub const ERROR: &str = "ERROR";

pub const CLIENT_ERROR_BAD_FORMAT: &str = "CLIENT_ERROR bad command line format";
pub const CLIENT_ERROR_BAD_CHUNK: &str = "CLIENT_ERROR bad data chunk";
pub const CLIENT_ERROR_BAD_DELTA: &str = "CLIENT_ERROR invalid numeric delta argument";

pub const SERVER_ERROR_OOM_OBJECT: &str = "SERVER_ERROR out of memory storing object";
pub const SERVER_ERROR_TOO_LARGE: &str = "SERVER_ERROR request too large";
pub const SERVER_ERROR_LINE_TOO_LONG: &str = "SERVER_ERROR output line too long";

pub const ERROR_READ_ONLY: &str = "ERROR READ_ONLY";
pub const ERROR_OPTIMIZE_RUNNING: &str = "ERROR OPTIMIZE_RUNNING";

/// Leading fragment of a get hit: `VALUE <key>` follows.
pub const VALUE_PREFIX: &[u8] = b"VALUE ";
/// Reply terminator for get and stats.
pub const END: &[u8] = b"END\r\n";

/// The pre-formatted text between a key and its value in a get reply:
/// `" <flags> <len>\r\n"`. Stored contiguously ahead of the value so the
/// suffix and value go out as a single segment.
pub fn item_suffix(flags: u32, vlen: usize) -> Vec<u8> {
    format!(" {} {}\r\n", flags, vlen).into_bytes()
}

/// `VERSION <v>` line body.
pub fn version_line(version: &str) -> String {
    format!("VERSION {}", version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_framing() {
        assert_eq!(item_suffix(7, 5), b" 7 5\r\n");
        assert_eq!(item_suffix(0, 0), b" 0 0\r\n");
    }

    #[test]
    fn version_framing() {
        assert_eq!(version_line("0.7.1"), "VERSION 0.7.1");
    }
}
