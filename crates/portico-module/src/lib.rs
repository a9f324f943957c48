//! # portico-module: Default implementations
//!
//! This crate provides the default implementation for every Portico trait
//! the dispatch engine consumes, plus the OS plumbing it needs (listening
//! sockets, the control pipe, signal wiring).
//!
//! ## Default stack
//!
//! | Trait / concern    | Default Impl        | Alternative                   |
//! |--------------------|---------------------|-------------------------------|
//! | Executor           | ThreadPerTask       | FixedPool, InlineExecutor     |
//! | Transport          | TcpTransport        | any `SecureLayer` output      |
//! | HeaderParser       | Http1HeaderParser   | caller-provided               |
//! | CapabilityLoader   | StaticLoader        | caller-provided               |
//! | shutdown wake-up   | ControlPipe         | signal::install (SIGINT/TERM) |

pub mod control_pipe;
pub mod fixed_pool;
pub mod http1;
pub mod signal;
pub mod static_loader;
pub mod tcp;
pub mod thread_task;

pub use control_pipe::{ControlPipe, PipeDrain, SHUTDOWN_TOKEN};
pub use fixed_pool::FixedPool;
pub use http1::Http1HeaderParser;
pub use static_loader::StaticLoader;
pub use tcp::{bind_listener, resolve_bind_addr, ListenError, ListenStage, TcpTransport};
pub use thread_task::{InlineExecutor, ThreadPerTask};
