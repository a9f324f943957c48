//! Lifecycle controller.
//!
//! ```text
//! Created ──listen()──▶ Listening ──run()──▶ Running ──'q'──▶ ShuttingDown ──▶ Closed
//!    │                      │
//!    └──── setup failure ───┴──────────────────────────────────────────────▶ Closed
//! ```
//!
//! `run()` blocks in the readiness loop. Once the loop exits (shutdown
//! token, control-pipe hangup, or a fatal wait error) it drains in-flight
//! handler tasks, then closes the listener, still-pending connections,
//! cached capabilities, and the control pipe, in that order.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use portico_core::capability::{Capability, CapabilityLoader};
use portico_core::config::ServerConfig;
use portico_core::error::{ConfigError, Result, ServerError};
use portico_core::executor::{Executor, Task};
use portico_core::protocol::{HeaderParser, ProtocolHandler};
use portico_core::state::ServerState;
use portico_core::transport::{SecureLayer, Transport};
use portico_module::tcp::{bind_listener, resolve_bind_addr, ListenStage};
use portico_module::{signal, ControlPipe, Http1HeaderParser, TcpTransport, ThreadPerTask};
use tracing::{debug, error, info, trace, warn};

use crate::accept::ConnectionSink;
use crate::connection::{self, ConnectionContext};
use crate::governor::ConcurrencyGovernor;
use crate::multiplexer::{self, Multiplexer};
use crate::reader::RequestReader;
use crate::registry::CapabilityRegistry;
use crate::stats::{Counters, ServerStats};

/// State shared by the multiplexer, handler tasks, and the owning `Server`.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    state: AtomicU8,
    shutdown: AtomicBool,
    closed: AtomicBool,
    pub(crate) governor: Arc<ConcurrencyGovernor>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) handler: Arc<dyn ProtocolHandler>,
    pub(crate) reader: RequestReader,
    secure: Option<Arc<dyn SecureLayer>>,
    pub(crate) registry: CapabilityRegistry,
    pub(crate) control: Arc<ControlPipe>,
    pub(crate) stats: Arc<Counters>,
}

impl Shared {
    pub(crate) fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `next`; refused if already there or past it.
    pub(crate) fn advance(&self, next: ServerState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = ServerState::from_u8(current);
            if !from.can_advance_to(next) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(%from, to = %next, "[server] state change");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }

    /// Set the shutdown flag. Returns `true` for the first caller.
    pub(crate) fn begin_shutdown(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::AcqRel);
        if first {
            info!("[server] core shutdown in progress");
        }
        self.advance(ServerState::ShuttingDown);
        first
    }

    /// Drain the control pipe after a wake-up. Returns `true` when the
    /// readiness loop must stop.
    pub(crate) fn handle_control(&self) -> bool {
        let drained = self.control.drain();
        trace!(?drained, "[control] woke");
        if !drained.wants_shutdown() {
            return false;
        }
        if drained.hangup && !drained.shutdown_requested {
            warn!("[control] pipe hung up, treating as shutdown");
        }
        self.begin_shutdown();
        true
    }

    /// Blocking transport for a handler task, secure when configured.
    pub(crate) fn open_transport(&self, stream: TcpStream) -> io::Result<Box<dyn Transport>> {
        stream.set_nonblocking(false)?;
        match &self.secure {
            Some(layer) if self.config.secure_transport => {
                let mut transport = layer.accept(stream)?;
                transport.set_blocking(true)?;
                Ok(transport)
            }
            _ => Ok(Box::new(TcpTransport::new(stream))),
        }
    }

    /// Admit, then submit a process task for `conn`.
    ///
    /// Blocks the caller while the concurrency cap is reached.
    pub(crate) fn dispatch_connection(&self, conn: ConnectionContext) {
        let admission = self.governor.acquire();
        let peer = conn.peer();
        let task: Task = Box::new(move || connection::process(conn, admission));
        if let Err(err) = self.executor.submit(task) {
            warn!(%peer, %err, executor = self.executor.name(), "[dispatch] cannot submit handler task, dropping connection");
            self.stats.record_abandoned();
        }
    }
}

/// Sink that dispatches every accepted connection straight to a handler.
pub(crate) struct DispatchSink<'a>(pub(crate) &'a Shared);

impl ConnectionSink for DispatchSink<'_> {
    fn deliver(&self, conn: ConnectionContext) {
        self.0.dispatch_connection(conn);
    }
}

/// Wakes a running server's readiness loop with the shutdown token.
#[derive(Clone)]
pub struct ShutdownHandle {
    control: Arc<ControlPipe>,
}

impl ShutdownHandle {
    /// Request shutdown. Safe to call any number of times; once the server
    /// has closed this is a logged no-op returning `false`.
    pub fn shutdown(&self) -> bool {
        match self.control.notify_shutdown() {
            Ok(sent) => {
                if sent {
                    debug!("[server] shutdown requested");
                } else {
                    debug!("[server] already closed, shutdown ignored");
                }
                sent
            }
            Err(err) => {
                warn!(%err, "[server] cannot write shutdown token");
                false
            }
        }
    }
}

pub struct ServerBuilder {
    config: ServerConfig,
    handler: Option<Arc<dyn ProtocolHandler>>,
    parser: Option<Arc<dyn HeaderParser>>,
    executor: Option<Arc<dyn Executor>>,
    secure: Option<Arc<dyn SecureLayer>>,
    loader: Option<Arc<dyn CapabilityLoader>>,
}

impl ServerBuilder {
    pub fn handler<H: ProtocolHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Header parser; defaults to `Http1HeaderParser`.
    pub fn parser<P: HeaderParser + 'static>(mut self, parser: P) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Task executor; defaults to `ThreadPerTask`.
    pub fn executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn secure_layer<S: SecureLayer + 'static>(mut self, layer: S) -> Self {
        self.secure = Some(Arc::new(layer));
        self
    }

    pub fn capability_loader<L: CapabilityLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Create the server in `Created` state. Opens the control pipe only.
    pub fn build(self) -> Result<Server> {
        let handler = self
            .handler
            .ok_or(ConfigError::MissingComponent("protocol handler"))?;
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(Http1HeaderParser::new()));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ThreadPerTask::default()));
        let control = ControlPipe::create().map_err(ServerError::ControlPipe)?;

        let reader = RequestReader::new(parser, self.config.buffer_size);
        let shared = Arc::new(Shared {
            governor: Arc::new(ConcurrencyGovernor::new(self.config.max_handlers)),
            config: self.config,
            state: AtomicU8::new(ServerState::Created.as_u8()),
            shutdown: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            executor,
            handler,
            reader,
            secure: self.secure,
            registry: CapabilityRegistry::new(self.loader),
            control: Arc::new(control),
            stats: Arc::new(Counters::default()),
        });

        Ok(Server {
            shared,
            multiplexer: None,
            local_addr: None,
        })
    }
}

/// One server instance: a listener, its readiness loop, and everything the
/// handler tasks share.
pub struct Server {
    shared: Arc<Shared>,
    multiplexer: Option<Box<dyn Multiplexer>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            handler: None,
            parser: None,
            executor: None,
            secure: None,
            loader: None,
        }
    }

    /// Open the listening socket and register it for readiness.
    ///
    /// `Created → Listening`. Any failure closes the server.
    pub fn listen(&mut self) -> Result<SocketAddr> {
        let found = self.state();
        if found != ServerState::Created {
            return Err(ServerError::InvalidState {
                expected: ServerState::Created,
                found,
            });
        }
        match self.open_listener() {
            Ok(addr) => Ok(addr),
            Err(err) => {
                error!(%err, "[server] setup failed");
                self.teardown();
                Err(err)
            }
        }
    }

    fn open_listener(&mut self) -> Result<SocketAddr> {
        let config = &self.shared.config;
        config.validate()?;
        if config.secure_transport && self.shared.secure.is_none() {
            return Err(ServerError::SecureLayerMissing);
        }

        let addr = resolve_bind_addr(&config.bind_host, config.port).map_err(|source| {
            ServerError::Resolve {
                host: config.bind_host.clone(),
                port: config.port,
                source,
            }
        })?;
        let listener = bind_listener(addr, config.listen_backlog).map_err(|err| match err.stage {
            ListenStage::Socket | ListenStage::Bind => ServerError::Bind {
                addr,
                source: err.source,
            },
            ListenStage::Listen => ServerError::Listen {
                addr,
                source: err.source,
            },
        })?;
        listener
            .set_nonblocking(true)
            .map_err(ServerError::Nonblocking)?;
        let local = listener.local_addr().unwrap_or(addr);

        let listener: Arc<TcpListener> = Arc::new(listener);
        let mux = multiplexer::build(&self.shared, listener)?;

        info!(addr = %local, config = %self.shared.config.summary(), "[server] listening");
        self.local_addr = Some(local);
        self.multiplexer = Some(mux);
        self.shared.advance(ServerState::Listening);
        Ok(local)
    }

    /// Run the readiness loop until shutdown, then tear down.
    ///
    /// Calls [`listen`](Self::listen) first when still `Created`.
    pub fn run(&mut self) -> Result<()> {
        if self.state() == ServerState::Created {
            self.listen()?;
        }
        let Some(mut mux) = self.multiplexer.take() else {
            return Err(ServerError::InvalidState {
                expected: ServerState::Listening,
                found: self.state(),
            });
        };

        self.shared.advance(ServerState::Running);
        info!(backend = %mux.backend(), "[server] running");
        let outcome = mux.run();
        if let Err(err) = &outcome {
            error!(%err, "[server] readiness loop failed");
        }

        self.shared.begin_shutdown();
        self.drain();
        mux.close();
        drop(mux);
        self.teardown();
        outcome
    }

    /// Wait for every admitted handler task, queued or running.
    fn drain(&self) {
        let started = Instant::now();
        let in_flight = self.shared.governor.in_flight();
        if in_flight > 0 {
            info!(in_flight, "[server] draining handler tasks");
        }
        self.shared
            .governor
            .wait_idle(self.shared.config.drain_poll, |n| {
                debug!(in_flight = n, "[server] waiting for handler tasks")
            });
        debug!(elapsed = ?started.elapsed(), "[server] drained");
    }

    /// Release everything still open. Idempotent.
    fn teardown(&mut self) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(mut mux) = self.multiplexer.take() {
            mux.close();
        }
        let released = self.shared.registry.release_all();
        self.shared.control.close();
        self.shared.closed.store(true, Ordering::Release);
        self.shared.advance(ServerState::Closed);
        info!(capabilities_released = released, "[server] closed");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            control: Arc::clone(&self.shared.control),
        }
    }

    /// Route SIGINT/SIGTERM to this server's control pipe.
    pub fn register_for_shutdown(&self) -> Result<()> {
        signal::install(&self.shared.control).map_err(ServerError::ControlPipe)
    }

    /// Cached capability lookup; loads on first use.
    pub fn capability(&self, name: &str, min_version: u64) -> Option<Arc<dyn Capability>> {
        self.shared.registry.get(name, min_version)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            counters: Arc::clone(&self.shared.stats),
            governor: Arc::clone(&self.shared.governor),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.teardown();
    }
}
