//! Named, versioned capabilities (authentication modules).
//!
//! A capability is loaded on first use by name with a minimum version and
//! cached by the server's registry until teardown.
//!
//! # Implementors
//!
//! - `StaticLoader` (portico-module): in-process factories registered by
//!   name, version-gated like a dynamic loader.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CapabilityError;
use crate::protocol::Response;
use crate::request::Request;

/// Default lockout window after repeated authentication failures.
pub const BLOCK_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default failed attempts before an account is blocked.
pub const BLOCK_ACCOUNT_ATTEMPTS: u32 = 3;

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted { session_id: String },
    Denied,
    /// Too many failures; retry after the lockout window.
    Blocked,
}

/// Authentication module contract.
///
/// **Contract:**
/// - `version()` is fixed for the lifetime of the instance.
/// - `close()` is called exactly once, during server teardown.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> u64;

    fn revision(&self) -> u64 {
        0
    }

    fn authenticate(&self, user: &str, password: &str, device: Option<&str>) -> AuthOutcome;

    fn check_password(&self, user: &str, password: &str) -> bool;

    fn update_password(&self, user: &str, password: &str) -> Result<(), CapabilityError> {
        let _ = (user, password);
        Err(CapabilityError::MissingSymbol {
            name: self.name().to_string(),
            symbol: "update_password",
        })
    }

    fn is_session_valid(&self, session_id: &str) -> bool;

    fn set_attribute(&self, session_id: &str, key: &str, value: &str) -> bool {
        let _ = (session_id, key, value);
        false
    }

    fn logout(&self, session_id: &str) -> bool;

    /// Module-specific web endpoint; `None` when the module has none.
    fn web_request(&self, path: &str, request: &Request) -> Option<Response> {
        let _ = (path, request);
        None
    }

    /// Release module resources.
    fn close(&self) {}

    fn block_account_timeout(&self) -> Duration {
        BLOCK_ACCOUNT_TIMEOUT
    }

    fn block_account_attempts(&self) -> u32 {
        BLOCK_ACCOUNT_ATTEMPTS
    }
}

/// Loads a capability by name, refusing versions below `min_version`.
pub trait CapabilityLoader: Send + Sync {
    fn load(&self, name: &str, min_version: u64) -> Result<Arc<dyn Capability>, CapabilityError>;
}

/// Read side of the registry, as seen by protocol handlers.
pub trait CapabilityLookup: Send + Sync {
    fn capability(&self, name: &str, min_version: u64) -> Option<Arc<dyn Capability>>;
}
