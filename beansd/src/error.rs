use std::io;

use thiserror::Error;

/// Errors surfaced while bringing the server up or tearing it down.
/// Per-connection trouble never reaches this type — it resolves to a reply
/// line or a closed connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket setup, reactor setup, or worker I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid configuration value.
    #[error("config: {0}")]
    Config(String),
    /// System resource limit too low (e.g. RLIMIT_NOFILE).
    #[error("{0}")]
    ResourceLimit(String),
}
