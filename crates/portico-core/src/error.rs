//! Error types for Portico
//!
//! Setup and lifecycle failures surface as [`ServerError`] from
//! `Server::listen()` / `Server::run()`. Everything scoped to one connection
//! ([`ReadError`], [`HeaderError`], [`SubmitError`]) stops at the handler task
//! and only ever reaches the log.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::config::Backend;
use crate::state::ServerState;

/// Result alias for setup and lifecycle operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Setup-phase and lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot resolve bind address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listen on {addr} failed: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("cannot make listening socket non-blocking: {0}")]
    Nonblocking(#[source] io::Error),

    #[error("readiness registration failed: {0}")]
    Multiplexer(#[source] io::Error),

    #[error("control pipe: {0}")]
    ControlPipe(#[source] io::Error),

    #[error("secure transport enabled but no secure layer configured")]
    SecureLayerMissing,

    #[error("invalid lifecycle state: expected {expected}, found {found}")]
    InvalidState {
        expected: ServerState,
        found: ServerState,
    },
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    InvalidValue(&'static str),

    #[error("unknown {key} value {value:?}")]
    UnknownValue { key: &'static str, value: String },

    #[error("{0} backend is not available on this platform")]
    BackendUnavailable(Backend),

    #[error("no {0} configured")]
    MissingComponent(&'static str),
}

/// Which read pass of the request reader was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Header,
    Body,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Header => f.write_str("header"),
            Pass::Body => f.write_str("body"),
        }
    }
}

/// Per-connection framing failures. The connection is dropped without a
/// response.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("connection closed during {pass} pass after {received} bytes")]
    ConnectionClosed { pass: Pass, received: usize },

    #[error("read failed during {pass} pass: {source}")]
    Io {
        pass: Pass,
        #[source]
        source: io::Error,
    },

    #[error("header divider missing with content-length {content_length}")]
    DividerMissing { content_length: usize },

    #[error("no header divider within the first {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("header parse failed: {0}")]
    HeaderParse(#[from] HeaderError),

    #[error("cannot grow read buffer to {0} bytes")]
    Allocation(usize),
}

/// Header parser capability failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("malformed header: {0}")]
    Malformed(&'static str),

    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),

    #[error("header block incomplete")]
    Incomplete,
}

/// Executor rejected a task. The task (and everything it captured) has
/// already been dropped.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("executor is shut down")]
    ShutDown,

    #[error("executor queue is full")]
    QueueFull,

    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Capability loading failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability {0:?} not found")]
    NotFound(String),

    #[error("capability {name:?} version {have} is lower than required {want}")]
    VersionTooLow { name: String, have: u64, want: u64 },

    #[error("capability {name:?} failed to load: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("capability {name:?} does not provide {symbol}")]
    MissingSymbol { name: String, symbol: &'static str },
}
