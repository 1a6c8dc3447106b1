//! Beansdb ASCII protocol.
//!
//! This crate handles the text side of the wire: splitting a command line
//! into tokens, turning a token line into a typed [`Request`], and the
//! status lines the server sends back. It never touches sockets — the
//! serving layer feeds it one command line at a time and reads value
//! payloads itself.
//!
//! # Example
//!
//! ```
//! use beans_proto::Request;
//!
//! let req = Request::parse(b"set fruit 7 0 5").unwrap();
//! match req {
//!     Request::Update { key, flags, vlen, .. } => {
//!         assert_eq!(key, b"fruit");
//!         assert_eq!(flags, 7);
//!         assert_eq!(vlen, 5);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

mod error;
mod request;
pub mod response;
mod token;

pub use error::ParseError;
pub use request::{Request, StatsSub, UpdateKind};
pub use token::{Token, TokenLine, MAX_TOKENS};

/// Maximum key length in bytes. Longer keys are a client error.
pub const MAX_KEY_LEN: usize = 250;

/// Highest verbosity level the `verbosity` command will set.
pub const MAX_VERBOSITY_LEVEL: u32 = 2;
