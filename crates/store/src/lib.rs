//! Vista store: transactional in-RAM table of cached objects.
//!
//! Readers load an immutable [`Snapshot`] through `ArcSwap` and never block.
//! Writers are serialized, mutate a private copy inside a [`Txn`] and publish it
//! in one swap on commit. Tables are shared between snapshots per kind and per
//! namespace, so a commit only copies what it touched.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::debug;
use vista_core::{CachedObject, Kind, ObjectKey};

type NsTable = BTreeMap<String, Arc<CachedObject>>;
type KindTable = BTreeMap<String, Arc<NsTable>>;

/// Immutable point-in-time view of the store.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    epoch: u64,
    len: usize,
    tables: FxHashMap<Kind, Arc<KindTable>>,
}

impl Snapshot {
    /// Bumped once per committed transaction that changed something.
    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn get(&self, kind: Kind, namespace: &str, name: &str) -> Option<Arc<CachedObject>> {
        self.tables.get(&kind)?.get(namespace)?.get(name).cloned()
    }

    pub fn get_key(&self, key: &ObjectKey) -> Option<Arc<CachedObject>> { self.get(key.kind, &key.namespace, &key.name) }

    /// Objects of `kind`, optionally restricted to one namespace, ordered by (namespace, name).
    pub fn list(&self, kind: Kind, namespace: Option<&str>) -> Vec<Arc<CachedObject>> {
        let Some(table) = self.tables.get(&kind) else { return Vec::new() };
        match namespace {
            Some(ns) => table.get(ns).map(|t| t.values().cloned().collect()).unwrap_or_default(),
            None => table.values().flat_map(|t| t.values().cloned()).collect(),
        }
    }

    pub fn count(&self, kind: Kind, namespace: Option<&str>) -> usize {
        let Some(table) = self.tables.get(&kind) else { return 0 };
        match namespace {
            Some(ns) => table.get(ns).map(|t| t.len()).unwrap_or(0),
            None => table.values().map(|t| t.len()).sum(),
        }
    }
}

/// Write transaction over a private copy of the current snapshot.
pub struct Txn {
    next: Snapshot,
    dirty: bool,
}

impl Txn {
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<CachedObject>> { self.next.get_key(key) }

    pub fn list(&self, kind: Kind, namespace: Option<&str>) -> Vec<Arc<CachedObject>> { self.next.list(kind, namespace) }

    /// Insert or replace the object at its identity key; returns the previous one.
    pub fn put(&mut self, obj: CachedObject) -> Option<Arc<CachedObject>> {
        let table = Arc::make_mut(self.next.tables.entry(obj.key.kind).or_default());
        let ns = Arc::make_mut(table.entry(obj.key.namespace.clone()).or_default());
        let prev = ns.insert(obj.key.name.clone(), Arc::new(obj));
        if prev.is_none() { self.next.len += 1; }
        self.dirty = true;
        prev
    }

    /// Remove the object at `key`; absent keys are a no-op.
    pub fn delete(&mut self, key: &ObjectKey) -> Option<Arc<CachedObject>> {
        self.next.get_key(key)?;
        let table = Arc::make_mut(self.next.tables.get_mut(&key.kind)?);
        let ns = Arc::make_mut(table.get_mut(&key.namespace)?);
        let prev = ns.remove(&key.name);
        if ns.is_empty() { table.remove(&key.namespace); }
        if prev.is_some() {
            self.next.len -= 1;
            self.dirty = true;
        }
        prev
    }
}

/// The object store. Cheap to share behind `Arc`.
pub struct ObjectStore {
    current: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    epoch_tx: watch::Sender<u64>,
}

impl Default for ObjectStore {
    fn default() -> Self { Self::new() }
}

impl ObjectStore {
    pub fn new() -> Self {
        let (epoch_tx, _rx) = watch::channel(0u64);
        Self { current: ArcSwap::from_pointee(Snapshot::default()), writer: Mutex::new(()), epoch_tx }
    }

    /// Current consistent view.
    pub fn snapshot(&self) -> Arc<Snapshot> { self.current.load_full() }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    /// Run `f` against a private copy and publish it if `f` succeeds and changed anything.
    /// Writers are serialized; readers keep seeing the previous snapshot until the swap.
    pub fn transaction<R, E>(&self, f: impl FnOnce(&mut Txn) -> Result<R, E>) -> Result<R, E> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let base = self.current.load_full();
        let mut txn = Txn { next: (*base).clone(), dirty: false };
        let out = f(&mut txn)?;
        if txn.dirty {
            let mut next = txn.next;
            next.epoch = base.epoch.saturating_add(1);
            let epoch = next.epoch;
            let len = next.len;
            self.current.store(Arc::new(next));
            self.epoch_tx.send_replace(epoch);
            metrics::counter!("store_commits_total", 1u64);
            metrics::gauge!("store_objects", len as f64);
            debug!(epoch, objects = len, "store commit");
        }
        Ok(out)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Txn) -> R) -> R {
        match self.transaction::<R, std::convert::Infallible>(|t| Ok(f(t))) {
            Ok(r) => r,
            Err(never) => match never {},
        }
    }

    pub fn put(&self, obj: CachedObject) -> Option<Arc<CachedObject>> { self.write(|t| t.put(obj)) }

    pub fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Option<Arc<CachedObject>> {
        let key = ObjectKey::new(kind, namespace, name);
        self.write(|t| t.delete(&key))
    }

    pub fn get(&self, kind: Kind, namespace: &str, name: &str) -> Option<Arc<CachedObject>> {
        self.current.load().get(kind, namespace, name)
    }

    pub fn list(&self, kind: Kind, namespace: Option<&str>) -> Vec<Arc<CachedObject>> {
        self.current.load().list(kind, namespace)
    }
}
