//! # portico-core: Trait definitions and data model for Portico
//!
//! This crate defines the trait boundaries between the dispatch engine
//! (`portico-server`) and its external collaborators. Each trait models one
//! capability the engine consumes but does not implement itself:
//!
//! | Trait              | Collaborator                                   |
//! |--------------------|------------------------------------------------|
//! | `Transport`        | an accepted connection (plain or secure)       |
//! | `SecureLayer`      | opaque TLS session setup                       |
//! | `HeaderParser`     | "parse header, report content-length"          |
//! | `ProtocolHandler`  | response generation for one framed message     |
//! | `Executor`         | "submit a task closure for async execution"    |
//! | `CapabilityLoader` | name-addressed plugin loading                  |
//!
//! Default implementations live in `portico-module`.

pub mod capability;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod request;
pub mod state;
pub mod transport;

pub use capability::{AuthOutcome, Capability, CapabilityLoader, CapabilityLookup};
pub use config::{AcceptMode, Backend, ServerConfig, MAX_CONCURRENT_HANDLERS};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
pub use error::{
    CapabilityError, ConfigError, HeaderError, Pass, ReadError, Result, ServerError, SubmitError,
};
pub use executor::{Executor, Task};
pub use protocol::{HeaderParser, ParsedHeader, ProtocolHandler, RequestContext, Response, WriteType};
pub use request::Request;
pub use state::ServerState;
pub use transport::{SecureLayer, Transport};
