//! `auth.password`: an in-memory password table with sessions and
//! lockout after repeated failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use portico_core::capability::{
    AuthOutcome, Capability, BLOCK_ACCOUNT_ATTEMPTS, BLOCK_ACCOUNT_TIMEOUT,
};
use portico_core::error::CapabilityError;
use tracing::{debug, info};

pub const NAME: &str = "auth.password";
pub const VERSION: u64 = 1;

#[derive(Default)]
struct Failures {
    count: u32,
    since: Option<Instant>,
}

#[derive(Default)]
struct Session {
    user: String,
    attributes: HashMap<String, String>,
}

pub struct PasswordTable {
    passwords: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, Session>>,
    failures: Mutex<HashMap<String, Failures>>,
    next_session: AtomicU64,
    block_timeout: Duration,
    block_attempts: u32,
}

impl PasswordTable {
    pub fn new() -> Self {
        Self {
            passwords: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            block_timeout: BLOCK_ACCOUNT_TIMEOUT,
            block_attempts: BLOCK_ACCOUNT_ATTEMPTS,
        }
    }

    /// Parse `user:password[,user:password...]`. Entries without a colon are skipped.
    pub fn parse(entries: &str) -> Self {
        let table = Self::new();
        {
            let mut passwords = table.passwords.lock().unwrap_or_else(|e| e.into_inner());
            for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                if let Some((user, password)) = entry.split_once(':') {
                    passwords.insert(user.trim().to_string(), password.to_string());
                }
            }
        }
        table
    }

    pub fn block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    pub fn users(&self) -> usize {
        self.passwords.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn into_capability(self) -> Arc<dyn Capability> {
        Arc::new(self)
    }

    fn is_blocked(&self, user: &str) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let Some(f) = failures.get(user) else {
            return false;
        };
        match f.since {
            Some(since) if f.count >= self.block_attempts => {
                if since.elapsed() < self.block_timeout {
                    true
                } else {
                    failures.remove(user);
                    false
                }
            }
            _ => false,
        }
    }

    fn record_failure(&self, user: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let f = failures.entry(user.to_string()).or_default();
        f.count += 1;
        f.since = Some(Instant::now());
        if f.count == self.block_attempts {
            info!(user, "[auth] account blocked");
        }
    }

    fn open_session(&self, user: &str) -> String {
        let seq = self.next_session.fetch_add(1, Ordering::Relaxed);
        let id = format!("{user}-{seq:08x}");
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id.clone(),
            Session {
                user: user.to_string(),
                ..Session::default()
            },
        );
        id
    }
}

impl Default for PasswordTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Capability for PasswordTable {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u64 {
        VERSION
    }

    fn authenticate(&self, user: &str, password: &str, device: Option<&str>) -> AuthOutcome {
        if self.is_blocked(user) {
            return AuthOutcome::Blocked;
        }
        if !self.check_password(user, password) {
            self.record_failure(user);
            return AuthOutcome::Denied;
        }
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user);
        let session_id = self.open_session(user);
        debug!(user, device = ?device, session = %session_id, "[auth] session opened");
        AuthOutcome::Granted { session_id }
    }

    fn check_password(&self, user: &str, password: &str) -> bool {
        self.passwords
            .lock()
            .map(|p| p.get(user).is_some_and(|stored| stored == password))
            .unwrap_or(false)
    }

    fn update_password(&self, user: &str, password: &str) -> Result<(), CapabilityError> {
        let mut passwords = self.passwords.lock().unwrap_or_else(|e| e.into_inner());
        match passwords.get_mut(user) {
            Some(stored) => {
                *stored = password.to_string();
                Ok(())
            }
            None => Err(CapabilityError::NotFound(user.to_string())),
        }
    }

    fn is_session_valid(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .map(|s| s.contains_key(session_id))
            .unwrap_or(false)
    }

    fn set_attribute(&self, session_id: &str, key: &str, value: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.attributes.insert(key.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    fn logout(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(session) = &removed {
            debug!(user = %session.user, "[auth] logout");
        }
        removed.is_some()
    }

    fn close(&self) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn block_account_timeout(&self) -> Duration {
        self.block_timeout
    }

    fn block_account_attempts(&self) -> u32 {
        self.block_attempts
    }
}
