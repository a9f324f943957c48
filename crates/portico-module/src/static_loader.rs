//! `StaticLoader`: default `CapabilityLoader`.
//!
//! Capabilities are compiled in and registered by name with a version.
//! Loading applies the same version gate a dynamic module loader would.

use portico_core::capability::{Capability, CapabilityLoader};
use portico_core::error::CapabilityError;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type Factory = Box<dyn Fn() -> Arc<dyn Capability> + Send + Sync>;

struct Entry {
    version: u64,
    factory: Factory,
}

#[derive(Default)]
pub struct StaticLoader {
    entries: HashMap<String, Entry>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, advertising `version`.
    pub fn register<F>(mut self, name: impl Into<String>, version: u64, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Capability> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            Entry {
                version,
                factory: Box::new(factory),
            },
        );
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl CapabilityLoader for StaticLoader {
    fn load(&self, name: &str, min_version: u64) -> Result<Arc<dyn Capability>, CapabilityError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        if entry.version < min_version {
            return Err(CapabilityError::VersionTooLow {
                name: name.to_string(),
                have: entry.version,
                want: min_version,
            });
        }

        let cap = (entry.factory)();
        // the instance must agree with what was advertised
        if cap.version() < min_version {
            return Err(CapabilityError::VersionTooLow {
                name: name.to_string(),
                have: cap.version(),
                want: min_version,
            });
        }
        debug!(name, version = cap.version(), revision = cap.revision(), "[loader] capability loaded");
        Ok(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::capability::AuthOutcome;

    struct Fixed(u64);

    impl Capability for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn version(&self) -> u64 {
            self.0
        }
        fn authenticate(&self, _: &str, _: &str, _: Option<&str>) -> AuthOutcome {
            AuthOutcome::Denied
        }
        fn check_password(&self, _: &str, _: &str) -> bool {
            false
        }
        fn is_session_valid(&self, _: &str) -> bool {
            false
        }
        fn logout(&self, _: &str) -> bool {
            false
        }
    }

    fn loader() -> StaticLoader {
        StaticLoader::new()
            .register("auth", 2, || Arc::new(Fixed(2)))
            .register("liar", 5, || Arc::new(Fixed(1)))
    }

    #[test]
    fn test_load_meets_version() {
        let cap = loader().load("auth", 1).unwrap();
        assert_eq!(cap.version(), 2);
        assert!(loader().load("auth", 2).is_ok());
    }

    #[test]
    fn test_version_gate() {
        assert_eq!(
            loader().load("auth", 3).err(),
            Some(CapabilityError::VersionTooLow {
                name: "auth".into(),
                have: 2,
                want: 3
            })
        );
        assert!(matches!(
            loader().load("liar", 2),
            Err(CapabilityError::VersionTooLow { have: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(
            loader().load("ldap", 0).err(),
            Some(CapabilityError::NotFound("ldap".into()))
        );
        let mut names: Vec<_> = loader().names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, ["auth", "liar"]);
    }
}
