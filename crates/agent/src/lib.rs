//! Vista agent: registry of live telemetry delegates, one per address space.
//!
//! Handles are created on first lookup and memoized while the address space is
//! in the store. Deleting the address space discards the handle; a handle that
//! was already handed out becomes orphaned and fails its next `collect`.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use vista_core::{AddressSpaceKey, CachedObject, Kind};
use vista_ingest::DeleteObserver;
use vista_store::ObjectStore;

/// Opaque telemetry document produced by a collector.
pub type Telemetry = serde_json::Value;

/// Live metrics source for one address space.
pub trait TelemetryDelegate: Send + Sync {
    fn collect(&self) -> anyhow::Result<Telemetry>;
}

/// Capability that creates delegates; the collector transport lives behind it.
pub trait DelegateSource: Send + Sync {
    fn resolve(&self, key: &AddressSpaceKey) -> anyhow::Result<Arc<dyn TelemetryDelegate>>;
}

#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error("delegate for address space {0} is orphaned")]
    Orphaned(AddressSpaceKey),
    #[error("collecting telemetry for {key}")]
    Collect {
        key: AddressSpaceKey,
        #[source]
        source: anyhow::Error,
    },
}

pub struct DelegateHandle {
    key: AddressSpaceKey,
    delegate: Arc<dyn TelemetryDelegate>,
    live: AtomicBool,
}

impl DelegateHandle {
    pub fn key(&self) -> &AddressSpaceKey { &self.key }
    pub fn is_live(&self) -> bool { self.live.load(Ordering::Acquire) }

    pub fn collect(&self) -> Result<Telemetry, DelegateError> {
        if !self.is_live() { return Err(DelegateError::Orphaned(self.key.clone())); }
        self.delegate.collect().map_err(|source| DelegateError::Collect { key: self.key.clone(), source })
    }

    fn invalidate(&self) { self.live.store(false, Ordering::Release); }
}

impl std::fmt::Debug for DelegateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateHandle").field("key", &self.key).field("live", &self.is_live()).finish()
    }
}

pub struct DelegateRegistry {
    store: Arc<ObjectStore>,
    source: Arc<dyn DelegateSource>,
    handles: Mutex<FxHashMap<AddressSpaceKey, Arc<DelegateHandle>>>,
}

impl DelegateRegistry {
    pub fn new(store: Arc<ObjectStore>, source: Arc<dyn DelegateSource>) -> Self {
        Self { store, source, handles: Mutex::new(FxHashMap::default()) }
    }

    /// Handle for `key`, or `None` when the address space is not in the store
    /// or its delegate cannot be resolved.
    pub fn get(&self, key: &AddressSpaceKey) -> Option<Arc<DelegateHandle>> {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if self.store.get(Kind::AddressSpace, &key.namespace, &key.name).is_none() {
            if let Some(stale) = handles.remove(key) {
                stale.invalidate();
                debug!(key = %key, "discarded delegate for missing address space");
            }
            return None;
        }
        if let Some(h) = handles.get(key) {
            if h.is_live() { return Some(Arc::clone(h)); }
        }
        // Created under the lock so concurrent first lookups share one handle.
        let delegate = match self.source.resolve(key) {
            Ok(d) => d,
            Err(e) => {
                warn!(key = %key, error = %e, "delegate resolution failed");
                metrics::counter!("delegate_resolve_failures_total", 1u64);
                return None;
            }
        };
        let handle = Arc::new(DelegateHandle { key: key.clone(), delegate, live: AtomicBool::new(true) });
        handles.insert(key.clone(), Arc::clone(&handle));
        metrics::counter!("delegate_resolutions_total", 1u64);
        metrics::gauge!("delegate_handles", handles.len() as f64);
        debug!(key = %key, "delegate created");
        Some(handle)
    }

    /// Drop and orphan the handle for `key`, if any.
    pub fn invalidate(&self, key: &AddressSpaceKey) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = handles.remove(key) {
            h.invalidate();
            metrics::gauge!("delegate_handles", handles.len() as f64);
        }
    }

    /// Orphan every handle; used when the cache shuts down.
    pub fn invalidate_all(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for (_k, h) in handles.drain() { h.invalidate(); }
        metrics::gauge!("delegate_handles", 0.0);
    }

    pub fn len(&self) -> usize { self.handles.lock().unwrap_or_else(|e| e.into_inner()).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl DeleteObserver for DelegateRegistry {
    fn on_deleted(&self, obj: &CachedObject) {
        if obj.kind() == Kind::AddressSpace {
            self.invalidate(&AddressSpaceKey::new(obj.namespace(), obj.name()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vista_core::WatchEvent;
    use vista_ingest::Ingestor;

    struct Echo(AddressSpaceKey);
    impl TelemetryDelegate for Echo {
        fn collect(&self) -> anyhow::Result<Telemetry> { Ok(serde_json::json!({ "space": self.0.to_string(), "connections": 2 })) }
    }

    #[derive(Default)]
    struct Counting { calls: AtomicUsize, fail: AtomicBool }
    impl DelegateSource for Counting {
        fn resolve(&self, key: &AddressSpaceKey) -> anyhow::Result<Arc<dyn TelemetryDelegate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) { anyhow::bail!("collector unreachable"); }
            Ok(Arc::new(Echo(key.clone())))
        }
    }

    fn setup() -> (Arc<Counting>, Arc<DelegateRegistry>, Ingestor) {
        let store = Arc::new(ObjectStore::new());
        let source = Arc::new(Counting::default());
        let registry = Arc::new(DelegateRegistry::new(Arc::clone(&store), source.clone()));
        let ing = Ingestor::new(store).with_observer(registry.clone());
        (source, registry, ing)
    }

    fn space(ing: &Ingestor, name: &str, v: u64) {
        ing.apply(WatchEvent::add(Kind::AddressSpace, "ns1", name, v, serde_json::json!({ "spec": { "type": "standard" } })));
    }

    #[test]
    fn absent_without_address_space() {
        let (source, registry, _ing) = setup();
        assert!(registry.get(&AddressSpaceKey::new("ns1", "space")).is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn memoized_while_present() {
        let (source, registry, ing) = setup();
        space(&ing, "space", 1);
        let key = AddressSpaceKey::new("ns1", "space");
        let a = registry.get(&key).unwrap();
        let b = registry.get(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.collect().unwrap()["connections"], 2);
    }

    #[test]
    fn delete_discards_and_orphans() {
        let (source, registry, ing) = setup();
        space(&ing, "space", 1);
        let key = AddressSpaceKey::new("ns1", "space");
        let held = registry.get(&key).unwrap();
        ing.apply(WatchEvent::delete(Kind::AddressSpace, "ns1", "space", None));
        assert!(registry.is_empty());
        assert!(matches!(held.collect(), Err(DelegateError::Orphaned(_))));
        assert!(registry.get(&key).is_none());

        // re-created address space gets a fresh handle
        space(&ing, "space", 2);
        let fresh = registry.get(&key).unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(fresh.collect().is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_all_orphans_every_handle() {
        let (source, registry, ing) = setup();
        space(&ing, "one", 1);
        space(&ing, "two", 1);
        let one = registry.get(&AddressSpaceKey::new("ns1", "one")).unwrap();
        let two = registry.get(&AddressSpaceKey::new("ns1", "two")).unwrap();
        assert_eq!(registry.len(), 2);
        registry.invalidate_all();
        assert!(registry.is_empty());
        assert!(matches!(one.collect(), Err(DelegateError::Orphaned(_))));
        assert!(matches!(two.collect(), Err(DelegateError::Orphaned(_))));
        // the address spaces still exist, so the next access resolves again
        assert!(registry.get(&AddressSpaceKey::new("ns1", "one")).unwrap().collect().is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_resolution_is_not_cached() {
        let (source, registry, ing) = setup();
        space(&ing, "space", 1);
        let key = AddressSpaceKey::new("ns1", "space");
        source.fail.store(true, Ordering::SeqCst);
        assert!(registry.get(&key).is_none());
        source.fail.store(false, Ordering::SeqCst);
        assert!(registry.get(&key).is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_access_creates_once() {
        let (source, registry, ing) = setup();
        space(&ing, "space", 1);
        let key = AddressSpaceKey::new("ns1", "space");
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                std::thread::spawn(move || registry.get(&key).unwrap())
            })
            .collect();
        let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
