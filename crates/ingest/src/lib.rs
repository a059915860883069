//! Vista ingest: applies normalized watch events to the object store.
//!
//! Policy:
//! - add/update applies only when strictly newer than the stored version
//! - delete always applies, unless it carries a version older than the stored one
//! - malformed events are dropped and logged, never surfaced to readers
//! - resync treats every listed object as an update and removes what the list omits

#![forbid(unsafe_code)]

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vista_core::{CachedObject, EventOp, Kind, ObjectKey, WatchEvent};
use vista_store::{ObjectStore, Txn};

/// Reasons an event is dropped before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestWarning {
    #[error("{kind} event has an empty name")]
    MissingName { kind: Kind },
    #[error("{key}: add/update without a version")]
    MissingVersion { key: ObjectKey },
    #[error("{key}: add/update without a payload")]
    MissingPayload { key: ObjectKey },
    #[error("{key}: namespaced kind without a namespace")]
    MissingNamespace { key: ObjectKey },
    #[error("{key}: cluster-scoped kind with a namespace")]
    UnexpectedNamespace { key: ObjectKey },
    #[error("{key}: listed during a {expected} resync")]
    WrongKind { key: ObjectKey, expected: Kind },
    #[error("{key}: outside the resync namespace {namespace}")]
    OutOfScope { key: ObjectKey, namespace: String },
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Deleted,
    /// Not newer than what the store holds; discarded.
    Stale { stored: u64, incoming: u64 },
    /// Delete for a key the store does not hold.
    Absent,
    Rejected(IngestWarning),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Deleted => "deleted",
            Outcome::Stale { .. } => "stale",
            Outcome::Absent => "absent",
            Outcome::Rejected(_) => "rejected",
        }
    }
}

/// Counts produced by a resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub applied: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub rejected: usize,
}

/// Notified after commit for every object removed from the store.
pub trait DeleteObserver: Send + Sync {
    fn on_deleted(&self, obj: &CachedObject);
}

fn validate(ev: &WatchEvent) -> Result<(), IngestWarning> {
    if ev.name.is_empty() { return Err(IngestWarning::MissingName { kind: ev.kind }); }
    if ev.kind.namespaced() && ev.namespace.is_empty() { return Err(IngestWarning::MissingNamespace { key: ev.key() }); }
    if !ev.kind.namespaced() && !ev.namespace.is_empty() { return Err(IngestWarning::UnexpectedNamespace { key: ev.key() }); }
    if ev.op != EventOp::Delete {
        if ev.version.is_none() { return Err(IngestWarning::MissingVersion { key: ev.key() }); }
        if ev.payload.is_none() { return Err(IngestWarning::MissingPayload { key: ev.key() }); }
    }
    Ok(())
}

fn in_scope(ev: &WatchEvent, kind: Kind, scope: Option<&str>) -> Result<(), IngestWarning> {
    if ev.kind != kind { return Err(IngestWarning::WrongKind { key: ev.key(), expected: kind }); }
    match scope {
        Some(ns) if ev.namespace != ns => Err(IngestWarning::OutOfScope { key: ev.key(), namespace: ns.to_string() }),
        _ => Ok(()),
    }
}

/// Applies events to the store under the version policy.
pub struct Ingestor {
    store: Arc<ObjectStore>,
    observers: Vec<Arc<dyn DeleteObserver>>,
}

impl Ingestor {
    pub fn new(store: Arc<ObjectStore>) -> Self { Self { store, observers: Vec::new() } }

    pub fn with_observer(mut self, observer: Arc<dyn DeleteObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn store(&self) -> &Arc<ObjectStore> { &self.store }

    pub fn apply(&self, ev: WatchEvent) -> Outcome {
        self.apply_batch(std::iter::once(ev)).pop().unwrap_or(Outcome::Absent)
    }

    /// Apply a batch in a single store transaction; one outcome per event, in order.
    pub fn apply_batch(&self, events: impl IntoIterator<Item = WatchEvent>) -> Vec<Outcome> {
        let mut removed: Vec<Arc<CachedObject>> = Vec::new();
        let outcomes = self.commit(|txn| events.into_iter().map(|ev| Self::apply_one(txn, ev, &mut removed)).collect::<Vec<_>>());
        for o in outcomes.iter() {
            metrics::counter!("ingest_events_total", 1u64, "outcome" => o.label());
        }
        self.notify(&removed);
        outcomes
    }

    /// Reconcile a full re-list of `kind` (optionally one namespace) with the store.
    ///
    /// Every listed object with a valid identity counts as present, even when
    /// its payload is rejected; only objects the list omits are removed.
    pub fn resync(&self, kind: Kind, namespace: Option<&str>, listed: Vec<WatchEvent>) -> ResyncReport {
        let scope = namespace.filter(|_| kind.namespaced());
        let mut removed: Vec<Arc<CachedObject>> = Vec::new();
        let report = self.commit(|txn| {
            let mut report = ResyncReport::default();
            let mut seen: FxHashSet<ObjectKey> = FxHashSet::default();
            for mut ev in listed {
                if let Err(w) = in_scope(&ev, kind, scope) {
                    warn!(warning = %w, "resync: dropping listed object");
                    metrics::counter!("ingest_events_total", 1u64, "outcome" => "rejected");
                    report.rejected += 1;
                    continue;
                }
                ev.op = EventOp::Update;
                let key = ev.key();
                let outcome = Self::apply_one(txn, ev, &mut removed);
                metrics::counter!("ingest_events_total", 1u64, "outcome" => outcome.label());
                match outcome {
                    Outcome::Applied => report.applied += 1,
                    Outcome::Stale { .. } => report.unchanged += 1,
                    Outcome::Rejected(IngestWarning::MissingName { .. }) => {
                        report.rejected += 1;
                        continue;
                    }
                    _ => report.rejected += 1,
                }
                seen.insert(key);
            }
            for obj in txn.list(kind, scope) {
                if !seen.contains(&obj.key) {
                    if let Some(prev) = txn.delete(&obj.key) {
                        removed.push(prev);
                        report.removed += 1;
                    }
                }
            }
            report
        });
        info!(kind = %kind, ns = ?scope, applied = report.applied, unchanged = report.unchanged, removed = report.removed, rejected = report.rejected, "resync reconciled");
        metrics::counter!("ingest_resyncs_total", 1u64);
        self.notify(&removed);
        report
    }

    fn commit<R>(&self, f: impl FnOnce(&mut Txn) -> R) -> R {
        match self.store.transaction::<R, std::convert::Infallible>(|t| Ok(f(t))) {
            Ok(r) => r,
            Err(never) => match never {},
        }
    }

    fn notify(&self, removed: &[Arc<CachedObject>]) {
        for obj in removed {
            for o in self.observers.iter() { o.on_deleted(obj); }
        }
    }

    fn apply_one(txn: &mut Txn, ev: WatchEvent, removed: &mut Vec<Arc<CachedObject>>) -> Outcome {
        if let Err(w) = validate(&ev) {
            warn!(warning = %w, "dropping malformed event");
            return Outcome::Rejected(w);
        }
        let key = ev.key();
        let stored = txn.get(&key).map(|o| o.version);
        match (ev.op, ev.version, ev.payload) {
            (EventOp::Delete, incoming, _) => {
                if let (Some(stored), Some(incoming)) = (stored, incoming) {
                    if incoming < stored {
                        debug!(key = %key, stored, incoming, "ignoring delete older than stored object");
                        return Outcome::Stale { stored, incoming };
                    }
                }
                match txn.delete(&key) {
                    Some(prev) => {
                        removed.push(prev);
                        Outcome::Deleted
                    }
                    None => Outcome::Absent,
                }
            }
            (_, Some(incoming), Some(payload)) => match stored {
                Some(stored) if incoming <= stored => {
                    debug!(key = %key, stored, incoming, "discarding stale or duplicate event");
                    Outcome::Stale { stored, incoming }
                }
                _ => {
                    txn.put(CachedObject::new(key, incoming, payload));
                    Outcome::Applied
                }
            },
            // validate() guarantees version and payload on add/update
            _ => Outcome::Rejected(IngestWarning::MissingPayload { key }),
        }
    }
}

/// Messages accepted by the ingest loop.
#[derive(Debug, Clone)]
pub enum IngestMsg {
    Event(WatchEvent),
    Resync { kind: Kind, namespace: Option<String>, objects: Vec<WatchEvent> },
}

/// Totals reported when the ingest loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub batches: u64,
    pub events: u64,
    pub rejected: u64,
    pub resyncs: u64,
}

/// Spawn an ingest loop draining messages into batched transactions.
/// Returns the sender feeding it and a handle resolving to totals once all senders are dropped.
pub fn spawn_ingest(ingestor: Arc<Ingestor>, cap: usize) -> (mpsc::Sender<IngestMsg>, JoinHandle<IngestStats>) {
    let cap = cap.max(1);
    let (tx, mut rx) = mpsc::channel::<IngestMsg>(cap);
    let handle = tokio::spawn(async move {
        let mut stats = IngestStats::default();
        let mut pending: Vec<WatchEvent> = Vec::with_capacity(cap);
        while let Some(first) = rx.recv().await {
            let mut msgs = vec![first];
            while msgs.len() < cap {
                match rx.try_recv() {
                    Ok(m) => msgs.push(m),
                    Err(_) => break,
                }
            }
            for msg in msgs {
                match msg {
                    IngestMsg::Event(ev) => pending.push(ev),
                    IngestMsg::Resync { kind, namespace, objects } => {
                        flush(&ingestor, &mut pending, &mut stats);
                        let report = ingestor.resync(kind, namespace.as_deref(), objects);
                        stats.resyncs += 1;
                        stats.rejected += report.rejected as u64;
                    }
                }
            }
            flush(&ingestor, &mut pending, &mut stats);
        }
        info!(batches = stats.batches, events = stats.events, rejected = stats.rejected, resyncs = stats.resyncs, "ingest loop stopped");
        stats
    });
    (tx, handle)
}

fn flush(ingestor: &Ingestor, pending: &mut Vec<WatchEvent>, stats: &mut IngestStats) {
    if pending.is_empty() { return; }
    let n = pending.len();
    let outcomes = ingestor.apply_batch(pending.drain(..));
    stats.batches += 1;
    stats.events += n as u64;
    stats.rejected += outcomes.iter().filter(|o| matches!(o, Outcome::Rejected(_))).count() as u64;
    metrics::histogram!("ingest_batch_size", n as f64);
}
