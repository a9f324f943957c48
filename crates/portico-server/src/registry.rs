//! Capability registry: lazily loaded, cached by name.
//!
//! At most one entry exists per name. A cached entry older than the
//! requested version reports not-found and stays cached; callers that need
//! the newer version must re-resolve out of band.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use portico_core::capability::{Capability, CapabilityLoader, CapabilityLookup};
use tracing::{debug, warn};

pub struct CapabilityRegistry {
    loader: Option<Arc<dyn CapabilityLoader>>,
    entries: Mutex<HashMap<String, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    pub fn new(loader: Option<Arc<dyn CapabilityLoader>>) -> Self {
        Self {
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached capability `name` at `min_version` or newer, loading it on
    /// first use.
    pub fn get(&self, name: &str, min_version: u64) -> Option<Arc<dyn Capability>> {
        // held across the load: at most one entry per name
        let mut entries = self.lock();

        if let Some(cap) = entries.get(name) {
            if cap.version() < min_version {
                debug!(
                    name,
                    have = cap.version(),
                    want = min_version,
                    "[registry] cached capability too old"
                );
                return None;
            }
            return Some(Arc::clone(cap));
        }

        let Some(loader) = self.loader.as_ref() else {
            debug!(name, "[registry] no capability loader configured");
            return None;
        };
        match loader.load(name, min_version) {
            Ok(cap) => {
                entries.insert(name.to_string(), Arc::clone(&cap));
                Some(cap)
            }
            Err(err) => {
                warn!(name, min_version, %err, "[registry] capability load failed");
                None
            }
        }
    }

    /// Close and forget every cached capability. Returns how many.
    pub fn release_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (name, cap) in &drained {
            debug!(name = name.as_str(), "[registry] closing capability");
            cap.close();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Capability>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CapabilityLookup for CapabilityRegistry {
    fn capability(&self, name: &str, min_version: u64) -> Option<Arc<dyn Capability>> {
        self.get(name, min_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::capability::AuthOutcome;
    use portico_core::error::CapabilityError;
    use portico_module::StaticLoader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        version: u64,
        closes: Arc<AtomicUsize>,
    }

    impl Capability for Counted {
        fn name(&self) -> &str {
            "counted"
        }
        fn version(&self) -> u64 {
            self.version
        }
        fn authenticate(&self, user: &str, _: &str, _: Option<&str>) -> AuthOutcome {
            AuthOutcome::Granted {
                session_id: format!("s-{user}"),
            }
        }
        fn check_password(&self, _: &str, _: &str) -> bool {
            true
        }
        fn is_session_valid(&self, id: &str) -> bool {
            id.starts_with("s-")
        }
        fn logout(&self, _: &str) -> bool {
            true
        }
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingLoader {
        inner: StaticLoader,
        loads: AtomicUsize,
    }

    impl CapabilityLoader for CountingLoader {
        fn load(&self, name: &str, min: u64) -> Result<Arc<dyn Capability>, CapabilityError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(name, min)
        }
    }

    fn registry(version: u64) -> (CapabilityRegistry, Arc<CountingLoader>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&closes);
        let loader = Arc::new(CountingLoader {
            inner: StaticLoader::new().register("auth", version, move || {
                Arc::new(Counted {
                    version,
                    closes: Arc::clone(&c),
                })
            }),
            loads: AtomicUsize::new(0),
        });
        let reg = CapabilityRegistry::new(Some(loader.clone() as Arc<dyn CapabilityLoader>));
        (reg, loader, closes)
    }

    #[test]
    fn test_loads_once_and_caches() {
        let (reg, loader, _) = registry(2);
        let a = reg.get("auth", 1).unwrap();
        let b = reg.get("auth", 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(reg.len(), 1);
        assert!(a.is_session_valid("s-alice"));
    }

    #[test]
    fn test_stale_entry_not_evicted() {
        let (reg, loader, _) = registry(1);
        assert!(reg.get("auth", 1).is_some());
        assert!(reg.get("auth", 2).is_none());
        // still cached, and no reload was attempted
        assert_eq!(reg.len(), 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(reg.get("auth", 1).is_some());
    }

    #[test]
    fn test_failed_load_is_not_found() {
        let (reg, _, _) = registry(1);
        assert!(reg.get("auth", 5).is_none());
        assert!(reg.get("ldap", 0).is_none());
        assert!(reg.is_empty());

        let bare = CapabilityRegistry::new(None);
        assert!(bare.capability("auth", 0).is_none());
    }

    #[test]
    fn test_release_all_closes_once() {
        let (reg, _, closes) = registry(3);
        reg.get("auth", 0).unwrap();
        assert_eq!(reg.release_all(), 1);
        assert_eq!(reg.release_all(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(reg.is_empty());
    }
}
