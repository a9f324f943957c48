//! # portico-server: the dispatch engine
//!
//! Multiplexes one listening socket across many concurrent connections.
//! Each accepted connection becomes a task on the configured executor that
//! frames exactly one request (header, then body), hands it to the protocol
//! handler, writes the response, and closes.
//!
//! ```text
//!   listener ──▶ multiplexer ──▶ accept ──▶ governor ──▶ executor
//!                    ▲                                      │
//!   signal ──'q'──▶ control pipe              reader ◀──────┘
//!                                               │
//!                                    protocol handler ──▶ transport
//! ```
//!
//! ```rust,ignore
//! use portico_server::Server;
//! use portico_core::{ServerConfig, Response};
//!
//! let mut server = Server::builder(ServerConfig::from_env())
//!     .handler(MyHandler)
//!     .build()?;
//! server.register_for_shutdown()?;
//! server.run()?;
//! ```

mod accept;
mod connection;
pub mod governor;
mod multiplexer;
pub mod reader;
pub mod registry;
mod server;
mod stats;

pub use connection::ConnectionContext;
pub use governor::{AdmissionGuard, ConcurrencyGovernor};
pub use reader::{
    DividerScanner, RequestReader, DIVIDER, LARGE_READ_SIZE, MAX_HEADER_LEN, RESERVED_BODY_LENGTH,
};
pub use registry::CapabilityRegistry;
pub use server::{Server, ServerBuilder, ShutdownHandle};
pub use stats::{ServerStats, StatsSnapshot};
