//! Server configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods / command-line flags
//! 2. Environment variables (`PORTICO_*`)
//! 3. Library defaults ([`defaults`])
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_core::config::{Backend, ServerConfig};
//!
//! let config = ServerConfig::from_env()
//!     .port(8080)
//!     .backend(Backend::DescriptorSet);
//! config.validate()?;
//! ```

pub mod defaults;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::env::{env_get, env_get_bool, env_get_str};
use crate::error::ConfigError;

/// Upper bound on simultaneously running handler tasks.
pub const MAX_CONCURRENT_HANDLERS: usize = 256;

/// Readiness multiplexing design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// epoll, edge-triggered; Linux only.
    EdgeTriggered,
    /// select(2) over a fresh descriptor set each iteration.
    DescriptorSet,
}

impl Backend {
    /// Whether this backend can run on the current platform.
    pub fn is_available(self) -> bool {
        match self {
            Backend::EdgeTriggered => cfg!(target_os = "linux"),
            Backend::DescriptorSet => cfg!(unix),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::EdgeTriggered => "epoll",
            Backend::DescriptorSet => "select",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        if Backend::EdgeTriggered.is_available() {
            Backend::EdgeTriggered
        } else {
            Backend::DescriptorSet
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoll" | "edge" | "edge-triggered" => Ok(Backend::EdgeTriggered),
            "select" | "fdset" | "descriptor-set" => Ok(Backend::DescriptorSet),
            _ => Err(ConfigError::UnknownValue {
                key: "backend",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where accepted connections are taken off the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AcceptMode {
    /// Accept on the multiplexer task.
    #[default]
    Inline,
    /// Two-phase: the multiplexer submits an accept task which registers
    /// the new connections for readiness.
    Dedicated,
}

impl FromStr for AcceptMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(AcceptMode::Inline),
            "dedicated" | "two-phase" => Ok(AcceptMode::Dedicated),
            _ => Err(ConfigError::UnknownValue {
                key: "accept_mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AcceptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptMode::Inline => f.write_str("inline"),
            AcceptMode::Dedicated => f.write_str("dedicated"),
        }
    }
}

/// Server configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Event array capacity for the edge-triggered backend
    pub max_poll: usize,
    /// Initial read chunk size
    pub buffer_size: usize,
    /// Wrap accepted connections in the configured secure layer
    pub secure_transport: bool,
    /// `*`, an IP literal, or a resolvable hostname
    pub bind_host: String,
    /// Concurrency cap for handler tasks
    pub max_handlers: usize,
    pub listen_backlog: i32,
    pub backend: Backend,
    pub accept_mode: AcceptMode,
    /// Poll interval while teardown waits for handler tasks
    pub drain_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `PORTICO_PORT` - TCP port
    /// - `PORTICO_MAX_POLL` - Event array capacity
    /// - `PORTICO_BUFFER_SIZE` - Initial read chunk size
    /// - `PORTICO_TLS` - Secure transport (0/1)
    /// - `PORTICO_BIND_HOST` - Bind address or `*`
    /// - `PORTICO_MAX_HANDLERS` - Concurrency cap
    /// - `PORTICO_BACKLOG` - listen(2) backlog
    /// - `PORTICO_BACKEND` - `epoll` or `select`
    /// - `PORTICO_ACCEPT_MODE` - `inline` or `dedicated`
    pub fn from_env() -> Self {
        Self {
            port: env_get("PORTICO_PORT", defaults::PORT),
            max_poll: env_get("PORTICO_MAX_POLL", defaults::MAX_POLL),
            buffer_size: env_get("PORTICO_BUFFER_SIZE", defaults::BUFFER_SIZE),
            secure_transport: env_get_bool("PORTICO_TLS", defaults::SECURE_TRANSPORT),
            bind_host: env_get_str("PORTICO_BIND_HOST", defaults::BIND_HOST),
            max_handlers: env_get("PORTICO_MAX_HANDLERS", defaults::MAX_HANDLERS),
            listen_backlog: env_get("PORTICO_BACKLOG", defaults::LISTEN_BACKLOG),
            backend: env_get("PORTICO_BACKEND", Backend::default()),
            accept_mode: env_get("PORTICO_ACCEPT_MODE", AcceptMode::default()),
            drain_poll: Duration::from_millis(defaults::DRAIN_POLL_MS),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            port: defaults::PORT,
            max_poll: defaults::MAX_POLL,
            buffer_size: defaults::BUFFER_SIZE,
            secure_transport: defaults::SECURE_TRANSPORT,
            bind_host: defaults::BIND_HOST.to_string(),
            max_handlers: defaults::MAX_HANDLERS,
            listen_backlog: defaults::LISTEN_BACKLOG,
            backend: Backend::default(),
            accept_mode: AcceptMode::default(),
            drain_poll: Duration::from_millis(defaults::DRAIN_POLL_MS),
        }
    }

    // Builder methods

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_poll(mut self, n: usize) -> Self {
        self.max_poll = n;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn secure_transport(mut self, enable: bool) -> Self {
        self.secure_transport = enable;
        self
    }

    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn max_handlers(mut self, n: usize) -> Self {
        self.max_handlers = n;
        self
    }

    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn accept_mode(mut self, mode: AcceptMode) -> Self {
        self.accept_mode = mode;
        self
    }

    pub fn drain_poll(mut self, d: Duration) -> Self {
        self.drain_poll = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_poll == 0 {
            return Err(ConfigError::InvalidValue("max_poll must be > 0"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size must be > 0"));
        }
        if self.max_handlers == 0 {
            return Err(ConfigError::InvalidValue("max_handlers must be > 0"));
        }
        if self.bind_host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("bind_host must not be empty"));
        }
        if self.listen_backlog <= 0 {
            return Err(ConfigError::InvalidValue("listen_backlog must be > 0"));
        }
        if !self.backend.is_available() {
            return Err(ConfigError::BackendUnavailable(self.backend));
        }
        Ok(())
    }

    /// One-line summary for the startup log.
    pub fn summary(&self) -> String {
        format!(
            "port={} bind={} backend={} accept={} max_poll={} buffer={} max_handlers={} backlog={} tls={}",
            self.port,
            self.bind_host,
            self.backend,
            self.accept_mode,
            self.max_poll,
            self.buffer_size,
            self.max_handlers,
            self.listen_backlog,
            self.secure_transport,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = ServerConfig::new();
        assert_eq!(config.port, defaults::PORT);
        assert_eq!(config.max_handlers, MAX_CONCURRENT_HANDLERS);
        assert_eq!(config.bind_host, "*");
        assert!(!config.secure_transport);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("PORTICO_MAX_POLL", "64");
        std::env::set_var("PORTICO_ACCEPT_MODE", "two-phase");
        let config = ServerConfig::from_env();
        assert_eq!(config.max_poll, 64);
        assert_eq!(config.accept_mode, AcceptMode::Dedicated);
        std::env::remove_var("PORTICO_MAX_POLL");
        std::env::remove_var("PORTICO_ACCEPT_MODE");
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .port(0)
            .bind_host("127.0.0.1")
            .backend(Backend::DescriptorSet)
            .max_handlers(4);

        assert_eq!(config.port, 0);
        assert_eq!(config.bind_host, "127.0.0.1");
        assert_eq!(config.backend, Backend::DescriptorSet);
        assert_eq!(config.max_handlers, 4);
    }

    #[test]
    fn test_validation() {
        assert!(ServerConfig::new().max_poll(0).validate().is_err());
        assert!(ServerConfig::new().buffer_size(0).validate().is_err());
        assert!(ServerConfig::new().max_handlers(0).validate().is_err());
        assert!(ServerConfig::new().bind_host("  ").validate().is_err());
        assert!(ServerConfig::new().listen_backlog(0).validate().is_err());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("epoll".parse::<Backend>().ok(), Some(Backend::EdgeTriggered));
        assert_eq!("SELECT".parse::<Backend>().ok(), Some(Backend::DescriptorSet));
        assert!("kqueue".parse::<Backend>().is_err());
        assert!(Backend::default().is_available());
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn test_edge_triggered_rejected_off_linux() {
        let config = ServerConfig::new().backend(Backend::EdgeTriggered);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackendUnavailable(Backend::EdgeTriggered))
        ));
    }
}
