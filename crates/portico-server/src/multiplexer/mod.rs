//! Readiness multiplexers.
//!
//! Both designs watch the listening socket and the control-pipe read end
//! and return from `run()` once shutdown begins. They differ in how
//! connections reach a handler task:
//!
//! | Backend          | Connections                                        |
//! |------------------|----------------------------------------------------|
//! | `EdgeTriggered`  | registered individually, dispatched on first read  |
//! | `DescriptorSet`  | dispatched straight from accept, one per wake      |

use std::net::TcpListener;
use std::sync::Arc;

use portico_core::config::Backend;
use portico_core::error::Result;

use crate::server::Shared;

mod select;

pub(crate) trait Multiplexer: Send {
    fn backend(&self) -> Backend;

    /// Block in the readiness loop until shutdown begins.
    fn run(&mut self) -> Result<()>;

    /// Release loop resources after the drain. Idempotent.
    fn close(&mut self);
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;

        fn edge_triggered(
            shared: &Arc<Shared>,
            listener: Arc<TcpListener>,
        ) -> Result<Box<dyn Multiplexer>> {
            Ok(Box::new(epoll::EpollMultiplexer::new(Arc::clone(shared), listener)?))
        }
    } else {
        fn edge_triggered(
            _shared: &Arc<Shared>,
            _listener: Arc<TcpListener>,
        ) -> Result<Box<dyn Multiplexer>> {
            Err(portico_core::error::ConfigError::BackendUnavailable(Backend::EdgeTriggered).into())
        }
    }
}

/// Create the configured multiplexer and register the listener and the
/// control pipe with it.
pub(crate) fn build(shared: &Arc<Shared>, listener: Arc<TcpListener>) -> Result<Box<dyn Multiplexer>> {
    match shared.config.backend {
        Backend::EdgeTriggered => edge_triggered(shared, listener),
        Backend::DescriptorSet => Ok(Box::new(select::SelectMultiplexer::new(
            Arc::clone(shared),
            listener,
        )?)),
    }
}
