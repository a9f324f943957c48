//! Library defaults for [`ServerConfig`](super::ServerConfig).

/// TCP port the listener binds.
pub const PORT: u16 = 6502;

/// Capacity of the readiness event array (edge-triggered backend).
pub const MAX_POLL: usize = 1024;

/// Size of the first read chunk before the one-time upsize.
pub const BUFFER_SIZE: usize = 2048;

pub const SECURE_TRANSPORT: bool = false;

/// Wildcard: bind every IPv4 interface.
pub const BIND_HOST: &str = "*";

pub const MAX_HANDLERS: usize = super::MAX_CONCURRENT_HANDLERS;

pub const LISTEN_BACKLOG: i32 = 1024;

/// Teardown drain poll interval.
pub const DRAIN_POLL_MS: u64 = 5;
