//! Error taxonomy.
//!
//! Mirrors the error handling design: configuration errors are caught at
//! argument-parsing time (by clap itself, or by [`DaemonError::Config`]
//! during options validation), startup errors abort before any forwarding
//! begins, and everything past `SOCKET_ATTACHED` is reported through the
//! shutdown-flag mechanism in [`crate::reactor`] rather than `Result`.

use thiserror::Error;

/// Errors that can abort the daemon before or during startup.
///
/// Frame-level and transient-I/O failures during forwarding are not
/// represented here: they are handled inline (retry, drop-and-continue) or
/// folded into the shutdown flags, never propagated as a `Result`.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("{0}")]
    Config(String),

    #[error("failed to start NIC: {0}")]
    NicStart(String),

    #[error("failed to stop NIC: {0}")]
    NicStop(String),

    #[error("socket lockfile {path} is held by another process")]
    LockfileBusy { path: String },

    #[error("failed to bind socket at {path}: {source}")]
    SocketBind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to drop privileges: {0}")]
    PrivilegeDrop(String),

    #[error("event reactor setup failed: {0}")]
    Reactor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
